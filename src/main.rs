use dchub::accounts::Accounts;
use dchub::cli;
use dchub::config::Config;
use dchub::hub::Hub;
use dchub::server;
use dchub::usercommands::UserCommands;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = cli::parse(std::env::args());
    if args.help {
        print!("{}", cli::HELP_TEXT);
        return;
    }

    let paths = server::paths_from(&args.base_dir);

    let mut config = match Config::load(&paths.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };
    cli::apply_overrides(&mut config, &args.overrides);

    let accounts = match Accounts::load(&paths.accounts) {
        Ok(a) => a,
        Err(e) => {
            tracing::error!(error = %e, "failed to load accounts");
            std::process::exit(1);
        }
    };
    let usercommands = match UserCommands::load(&paths.usercommands) {
        Ok(u) => u,
        Err(e) => {
            tracing::error!(error = %e, "failed to load user commands");
            std::process::exit(1);
        }
    };
    let welcome = dchub::welcome::load(&paths.welcome);

    let port = config.port;
    let limits = config.limits.clone();
    let hub = Hub::new(config, accounts, usercommands, welcome, paths);

    if let Err(e) = server::run(hub, port, limits).await {
        tracing::error!(error = %e, "server exited with error");
        std::process::exit(1);
    }
}
