use clap::Parser;
use nexus_chat::cli::{self, ChatContext, Cli, Commands};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    cli::init_tracing(cli.verbose);

    match cli.command {
        Some(Commands::Run(ref args)) => {
            // One-shot mode
            cli::run(&cli, args.clone()).await
        }
        Some(Commands::Models) => cli::models(&cli).await,
        Some(Commands::Model(ref args)) => cli::model(&cli, args.clone()),
        Some(Commands::Sessions(ref args)) => cli::sessions(&cli, args.clone()),
        None => {
            let ctx = match ChatContext::open(&cli) {
                Ok(ctx) => ctx,
                Err(e) => {
                    eprintln!("Error: {e}");
                    return ExitCode::FAILURE;
                }
            };

            // Interactive mode
            match nexus_chat::interactive::run(ctx.store).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("Error: {e}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}
