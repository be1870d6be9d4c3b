use clap::Parser;
use cpp_grader::{config::Cli, logging, run};

fn main() {
    let cli = Cli::parse();
    logging::init(&cli);

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}
