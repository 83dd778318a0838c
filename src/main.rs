use topcat::app::*;
use topcat::application_port::*;
use topcat::logger::*;
use topcat::settings::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logger = Logger::new_bootstrap();

    let project_settings = parse_settings(cli.settings.as_deref())?;
    debug!(?project_settings);
    let logger_config = LogConfig {
        filter: project_settings.log.filter.clone(),
    };
    logger.reload_from_config(&logger_config)?;

    let app = App::try_new(&project_settings).await?;

    let result = run(&app, cli.command.unwrap_or(Command::Status)).await;
    print_state(&app.controller.snapshot());

    app.shutdown().await;
    result
}

async fn run(app: &App, command: Command) -> anyhow::Result<()> {
    let controller = &app.controller;
    match command {
        Command::Status => {}
        Command::SignUp {
            email,
            password,
            username,
        } => {
            let outcome = controller.sign_up(&email, &password, &username).await?;
            println!("created account {}", outcome.user.id);
        }
        Command::SignIn { email, password } => {
            controller.sign_in(&email, &password).await?;
        }
        Command::SignOut => controller.sign_out().await,
        Command::ResetPassword { email } => controller.reset_password(&email).await?,
        Command::Refresh => controller.refresh_session().await?,
        Command::Callback { url } => {
            if !controller.exchange_code(&url).await? {
                println!("no auth code in {url}");
            }
        }
        Command::CompleteRegistration { username } => {
            let user = controller.complete_registration(&username).await?;
            println!("profile created for {}", user.username);
        }
        Command::Storage => {
            let info = controller.storage_info();
            println!("storage: {:?} (available: {})", info.kind, info.available);
        }
        Command::StorageCleanup => {
            let removed = controller.cleanup_storage().await;
            if removed.is_empty() {
                println!("no corrupted entries");
            }
            for key in removed {
                println!("removed {key}");
            }
        }
    }
    Ok(())
}

fn print_state(state: &AuthState) {
    println!("phase: {:?}", state.phase);
    match &state.user {
        Some(user) => println!("user: {} <{}> ({})", user.username, user.email, user.id),
        None => println!("user: -"),
    }
    if let Some(expires_at) = state.session.as_ref().and_then(|s| s.expires_at()) {
        println!("session expires: {expires_at}");
    }
    if let Some(notice) = &state.notice {
        println!("notice: {notice}");
    }
    if let Some(error) = &state.error {
        println!("error: {error}");
    }
}
