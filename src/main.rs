use std::{
    io::{self, BufRead, Write},
    sync::{Arc, Mutex, PoisonError},
};

use chisel_manager::{
    ConnectionState, ConnectionSupervisor, LivenessMonitor, Notification, ProfileData, ProfileId, ProfileStore,
    Settings, ShutoffPolicy, StartupPolicy,
    configuration::SupervisorConfiguration,
    process_log::{ProcessLog, SharedProcessLog},
    system::{ClientLauncher, find_client_binary},
};

const HELP: &str = "\
commands:
  list                                  show profiles
  status                                show the connection state
  add <name> <url> [arguments...]       add a profile (arguments default to `socks`)
  edit <id> <name> <url> [arguments...] replace a profile
  delete <id>                           delete a profile
  connect <id>                          start the client for a profile
  disconnect                            stop the active client
  settings [<startup> <shutoff>]        show or change settings
  log                                   show recent client output
  quit                                  disconnect and exit";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    List,
    Status,
    Add(ProfileData),
    Edit(ProfileId, ProfileData),
    Delete(ProfileId),
    Connect(ProfileId),
    Disconnect,
    ShowSettings,
    SaveSettings(Settings),
    Log,
    Help,
    Quit,
}

fn parse_profile_id(token: Option<&str>) -> Result<ProfileId, String> {
    let token = token.ok_or("missing profile id")?;
    token
        .parse::<u64>()
        .map(ProfileId)
        .map_err(|_| format!("invalid profile id: {token}"))
}

const DEFAULT_ARGUMENTS: &str = "socks";

fn parse_profile_data<'a>(
    mut tokens: impl Iterator<Item = &'a str>,
    default_arguments: &str,
) -> Result<ProfileData, String> {
    let name = tokens.next().ok_or("missing name")?;
    let url = tokens.next().ok_or("missing url")?;
    let arguments = tokens.collect::<Vec<_>>().join(" ");
    let arguments = if arguments.is_empty() {
        default_arguments
    } else {
        arguments.as_str()
    };
    Ok(ProfileData::new(name, url, arguments))
}

fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut tokens = line.split_whitespace();
    let Some(verb) = tokens.next() else {
        return Ok(None);
    };

    let command = match verb {
        "list" | "ls" => Command::List,
        "status" => Command::Status,
        "add" => Command::Add(parse_profile_data(tokens, DEFAULT_ARGUMENTS)?),
        "edit" => {
            let id = parse_profile_id(tokens.next())?;
            Command::Edit(id, parse_profile_data(tokens, "")?)
        }
        "delete" | "rm" => Command::Delete(parse_profile_id(tokens.next())?),
        "connect" => Command::Connect(parse_profile_id(tokens.next())?),
        "disconnect" => Command::Disconnect,
        "settings" => match (tokens.next(), tokens.next()) {
            (None, _) => Command::ShowSettings,
            (Some(startup), Some(shutoff)) => Command::SaveSettings(Settings {
                startup: StartupPolicy::parse(startup)
                    .ok_or_else(|| format!("unknown startup policy: {startup}"))?,
                shutoff: ShutoffPolicy::parse(shutoff)
                    .ok_or_else(|| format!("unknown shutoff policy: {shutoff}"))?,
            }),
            (Some(_), None) => return Err("settings needs both <startup> and <shutoff>".into()),
        },
        "log" => Command::Log,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command: {other} (try `help`)")),
    };
    Ok(Some(command))
}

fn validate(data: &ProfileData) -> Result<(), String> {
    if data.name.trim().is_empty() || data.url.trim().is_empty() {
        return Err("name and url cannot be empty".into());
    }
    Ok(())
}

fn print_profiles(supervisor: &ConnectionSupervisor) {
    let views = supervisor.list_profiles();
    if views.is_empty() {
        println!("no profiles (add one with `add <name> <url> [arguments...]`)");
        return;
    }
    for view in views {
        println!(
            "{:>3}  {:<16} {:<40} [{}] {}",
            view.profile.id,
            view.profile.name(),
            view.profile.endpoint(),
            view.profile.data.arguments,
            match (view.connect_enabled, view.disconnect_enabled) {
                (false, true) => "connected, disconnect available",
                _ => "connect available",
            }
        );
    }
}

fn describe_state(state: ConnectionState, supervisor: &ConnectionSupervisor) -> String {
    match state {
        ConnectionState::Running(id) => {
            let name = supervisor
                .profile(id)
                .map(|profile| profile.name().to_string())
                .unwrap_or_else(|| id.to_string());
            format!("Connected to {name}")
        }
        _ => "Not connected".into(),
    }
}

fn describe(notification: &Notification) -> String {
    match notification {
        Notification::Connected { name, .. } => format!("Connected to {name}"),
        Notification::Disconnected {
            exit,
            unexpected: true,
            ..
        } => format!("Not connected (client exited: {exit})"),
        Notification::Disconnected { .. } => "Not connected".into(),
        Notification::SpawnFailed { cause, .. } => format!("Failed to start client: {cause}"),
    }
}

fn execute(
    command: Command,
    supervisor: &ConnectionSupervisor,
    process_log: &SharedProcessLog,
) -> Result<(), String> {
    match command {
        Command::List => print_profiles(supervisor),
        Command::Status => println!("{}", describe_state(supervisor.state(), supervisor)),
        Command::Add(data) => {
            validate(&data)?;
            let id = supervisor.add_profile(data).map_err(|error| error.to_string())?;
            println!("added profile {id}");
        }
        Command::Edit(id, data) => {
            validate(&data)?;
            supervisor
                .update_profile(id, data)
                .map_err(|error| error.to_string())?;
        }
        Command::Delete(id) => supervisor
            .delete_profile(id)
            .map_err(|error| error.to_string())?,
        Command::Connect(id) => supervisor.connect(id).map_err(|error| error.to_string())?,
        Command::Disconnect => supervisor.disconnect(),
        Command::ShowSettings => {
            let settings = supervisor.settings();
            println!(
                "startup: {}\nshutoff: {}",
                settings.startup.label(),
                settings.shutoff.label()
            );
        }
        Command::SaveSettings(settings) => supervisor
            .save_settings(settings)
            .map_err(|error| error.to_string())?,
        Command::Log => {
            let lines = process_log
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .lines();
            for line in lines {
                println!("{line}");
            }
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("chisel_manager=info"),
    )
    .init();

    log::info!(
        "chisel-manager v{} starting (RUST_LOG={})",
        env!("CARGO_PKG_VERSION"),
        std::env::var("RUST_LOG").unwrap_or_else(|_| "<default: info>".into()),
    );

    let configuration_path = SupervisorConfiguration::configuration_file_path();
    let configuration = SupervisorConfiguration::load(&configuration_path);

    let (binary_path, binary_found) = find_client_binary(&configuration.binary);
    log::info!("[startup] client binary: {binary_path} (found={binary_found})");

    let store_path = configuration.store_path();
    let store = match ProfileStore::open(store_path, configuration.strict_store) {
        Ok(store) => store,
        Err(error) => {
            log::error!("[startup] {error}");
            eprintln!("chisel-manager: {error}");
            std::process::exit(1);
        }
    };
    log::info!("[startup] profile store: {}", store.path().display());

    let process_log: SharedProcessLog = Arc::new(Mutex::new(ProcessLog::new()));
    let launcher = ClientLauncher::new(process_log.clone(), configuration.logs_directory());
    let supervisor = Arc::new(ConnectionSupervisor::new(
        store,
        Arc::new(launcher),
        configuration.supervisor_options(binary_path),
    ));

    let notifications = supervisor.subscribe();
    std::thread::spawn(move || {
        let mut last_status = String::new();
        for notification in notifications {
            let status = describe(&notification);
            // Liveness ticks repeat the same status every period.
            if status != last_status {
                println!("* {status}");
                last_status = status;
            }
        }
    });

    let mut monitor =
        LivenessMonitor::start(Arc::downgrade(&supervisor), configuration.poll_interval());

    println!("SOCKS5 {}  (type `help` for commands)", configuration.socks_address);
    let stdin = io::stdin();
    loop {
        print!("> ");
        if let Err(error) = io::stdout().flush() {
            log::debug!("[console] flush failed: {error}");
        }

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(error) => {
                log::error!("[console] failed to read command: {error}");
                break;
            }
        }

        match parse_command(&line) {
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => {
                if let Err(message) = execute(command, &supervisor, &process_log) {
                    println!("error: {message}");
                }
            }
            Ok(None) => {}
            Err(message) => println!("error: {message}"),
        }
    }

    log::info!("[quit] shutting down");
    monitor.stop();
    supervisor.shutdown();
}
