use std::process::ExitCode;

use clap::Parser;
use fdb_style::cli::Cli;

#[cfg(any(feature = "ndarray", feature = "ndarray-blas-openblas"))]
mod ndarray {
    use std::process::ExitCode;

    use burn::backend::{
        ndarray::{NdArray, NdArrayDevice},
        Autodiff,
    };
    use fdb_style::cli::{run as run_cli, Cli};

    pub fn run(cli: Cli) -> ExitCode {
        run_cli::<Autodiff<NdArray>>(cli, NdArrayDevice::Cpu)
    }
}

#[cfg(feature = "tch-gpu")]
mod tch_gpu {
    use std::process::ExitCode;

    use burn::backend::{
        libtorch::{LibTorch, LibTorchDevice},
        Autodiff,
    };
    use fdb_style::cli::{run as run_cli, Cli};

    pub fn run(cli: Cli) -> ExitCode {
        #[cfg(not(target_os = "macos"))]
        let device = LibTorchDevice::Cuda(0);
        #[cfg(target_os = "macos")]
        let device = LibTorchDevice::Mps;

        run_cli::<Autodiff<LibTorch>>(cli, device)
    }
}

#[cfg(feature = "tch-cpu")]
mod tch_cpu {
    use std::process::ExitCode;

    use burn::backend::{
        libtorch::{LibTorch, LibTorchDevice},
        Autodiff,
    };
    use fdb_style::cli::{run as run_cli, Cli};

    pub fn run(cli: Cli) -> ExitCode {
        run_cli::<Autodiff<LibTorch>>(cli, LibTorchDevice::Cpu)
    }
}

#[cfg(feature = "wgpu")]
mod wgpu {
    use std::process::ExitCode;

    use burn::backend::{
        wgpu::{Wgpu, WgpuDevice},
        Autodiff,
    };
    use fdb_style::cli::{run as run_cli, Cli};

    pub fn run(cli: Cli) -> ExitCode {
        run_cli::<Autodiff<Wgpu>>(cli, WgpuDevice::default())
    }
}

#[allow(unreachable_code)]
fn main() -> ExitCode {
    let cli = Cli::parse();

    #[cfg(feature = "tch-gpu")]
    return tch_gpu::run(cli);
    #[cfg(feature = "tch-cpu")]
    return tch_cpu::run(cli);
    #[cfg(feature = "wgpu")]
    return wgpu::run(cli);
    #[cfg(any(feature = "ndarray", feature = "ndarray-blas-openblas"))]
    return ndarray::run(cli);

    eprintln!("No backend enabled; build with one of the ndarray, wgpu, tch-cpu or tch-gpu features");
    ExitCode::FAILURE
}
