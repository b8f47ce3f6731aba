use clap::{Parser, Subcommand};

use common::telemetry::init_telemetry;

use coord::command::serve::{ServeArgs, serve};

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
enum Cmd {
    /// Run the control plane HTTP server
    Serve(ServeArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry("coord")?;

    let args = Args::parse();

    match args.cmd {
        Cmd::Serve(serve_args) => {
            serve(serve_args).await?;
        }
    }

    Ok(())
}
