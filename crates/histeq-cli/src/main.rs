use clap::Parser;
use histeq_cli::{cmd_equalize, cmd_list, Cli};
use histeq_core::load_config;

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_filter()))
        .format_timestamp(None)
        .init();

    if cli.list {
        if let Err(e) = cmd_list() {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
        return;
    }

    let mut handle = load_config(cli.config.as_deref());
    if let Some(source) = &handle.source {
        log::info!("using config {}", source.display());
    }
    let flag_warnings = cli.apply_to(&mut handle.config);
    for warning in handle.warnings.iter().chain(&flag_warnings) {
        log::warn!("{}", warning);
    }

    if let Err(e) = cmd_equalize(&cli.input, cli.output.clone(), &handle.config) {
        eprintln!("Error: {}: {}", e.kind(), e);
        std::process::exit(1);
    }
}
