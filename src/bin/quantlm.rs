use clap::Parser;
use quantlm::cli::{Cli, Commands};

fn main() {
    quantlm::logging::init();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Generate(args) => quantlm::cli::generate_command(args),
    };
    std::process::exit(code);
}
