mod config;
mod environment;
mod host;
mod package;
mod runner;
mod substitute;
mod surface;
mod terminal;

use clap::{Parser, Subcommand};
use config::{ensure_parent, missing_programs, read_config, ConfigStore, DEFAULT_CONFIG_YAML};
use dialoguer::console::{style, Key, Term};
use dialoguer::theme::ColorfulTheme;
use dialoguer::Select;
use dirs::home_dir;
use environment::{EditorContext, ResolveError};
use host::{command_id, CANCEL_COMMAND, EDITOR_SELECTOR, WORKSPACE_SELECTOR};
use package::Package;
use runner::ProcessSpawner;
use serde::Serialize;
use serde_json::json;
use std::env;
use std::fs;
use std::io;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::Command;
use surface::{HeadlessFactory, SurfaceError};
use terminal::TerminalFactory;
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(name = "user-commands", version, about = "Run user-defined commands")]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    #[command(about = "List registered commands")]
    List,
    #[command(about = "Show the menu built from the configured commands")]
    Menu,
    #[command(about = "Show the placeholder values for a file")]
    Env {
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long = "var")]
        vars: Vec<String>,
    },
    #[command(about = "Run a command by name or id")]
    Run {
        target: String,
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long = "scope")]
        scopes: Vec<String>,
        #[arg(long = "var")]
        vars: Vec<String>,
    },
    #[command(about = "Pick and run commands interactively; Escape dismisses the output")]
    Shell {
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long = "var")]
        vars: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    Init,
    Edit,
    Validate,
}

#[derive(Debug, Error)]
pub enum UserCommandsError {
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("process error: {0}")]
    Process(String),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
}

#[derive(Debug, Serialize)]
struct JsonResult<T: Serialize> {
    ok: bool,
    result: Option<T>,
    error: Option<String>,
}

#[derive(Debug)]
struct Context {
    config_path: PathBuf,
    json: bool,
}

fn main() -> Result<(), UserCommandsError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let ctx = build_context(&cli);

    let result = match cli.command {
        Commands::Config { command } => handle_config(&ctx, command),
        Commands::List => handle_list(&ctx),
        Commands::Menu => handle_menu(&ctx),
        Commands::Env { file, vars } => handle_env(&ctx, file, vars),
        Commands::Run {
            target,
            file,
            scopes,
            vars,
        } => handle_run(&ctx, target, file, scopes, vars),
        Commands::Shell { file, vars } => handle_shell(&ctx, file, vars),
    };

    if let Err(err) = result {
        if ctx.json {
            let payload = JsonResult::<serde_json::Value> {
                ok: false,
                result: None,
                error: Some(err.to_string()),
            };
            print_json(&payload)?;
        } else {
            eprintln!("{err}");
        }
        std::process::exit(1);
    }

    Ok(())
}

fn build_context(cli: &Cli) -> Context {
    Context {
        config_path: resolve_config_path(cli.config.as_ref()),
        json: cli.json,
    }
}

fn resolve_config_path(override_path: Option<&PathBuf>) -> PathBuf {
    if let Some(path) = override_path {
        return path.clone();
    }
    if let Ok(path) = env::var("USER_COMMANDS_CONFIG") {
        return PathBuf::from(path);
    }
    let mut base = default_config_dir();
    base.push("config.yaml");
    base
}

fn default_config_dir() -> PathBuf {
    if let Ok(path) = env::var("USER_COMMANDS_CONFIG_DIR") {
        return PathBuf::from(path);
    }
    let mut base = home_dir().unwrap_or_else(|| PathBuf::from("."));
    base.push(".config");
    base.push("user-commands");
    base
}

fn load_config(ctx: &Context) -> Result<config::Config, UserCommandsError> {
    if !ctx.config_path.exists() {
        return Err(UserCommandsError::Config(format!(
            "no config at {}; run `user-commands config init` first",
            ctx.config_path.display()
        )));
    }
    read_config(&ctx.config_path)
}

fn editor_context(cfg: &config::Config, file: Option<&Path>) -> Result<EditorContext, UserCommandsError> {
    let cwd = env::current_dir()?;
    Ok(EditorContext::new(file, cfg.project_roots(), &cwd))
}

fn active_scopes(explicit: Vec<String>, has_file: bool) -> Vec<String> {
    if !explicit.is_empty() {
        return explicit;
    }
    let mut scopes = vec![WORKSPACE_SELECTOR.to_string()];
    if has_file {
        scopes.push(EDITOR_SELECTOR.to_string());
    }
    scopes
}

fn trigger_id(target: &str) -> String {
    if target.contains(':') {
        target.to_string()
    } else {
        command_id(target)
    }
}

fn handle_config(ctx: &Context, command: ConfigCommand) -> Result<(), UserCommandsError> {
    match command {
        ConfigCommand::Init => {
            if ctx.config_path.exists() {
                return output(ctx, json!({"path": ctx.config_path, "created": false}));
            }
            ensure_parent(&ctx.config_path)?;
            fs::write(&ctx.config_path, DEFAULT_CONFIG_YAML)?;
            output(ctx, json!({"path": ctx.config_path, "created": true}))
        }
        ConfigCommand::Edit => {
            if !ctx.config_path.exists() {
                ensure_parent(&ctx.config_path)?;
                fs::write(&ctx.config_path, DEFAULT_CONFIG_YAML)?;
            }
            let editor = env::var("VISUAL").ok().or_else(|| env::var("EDITOR").ok());
            if let Some(editor) = editor {
                let status = Command::new(editor)
                    .arg(&ctx.config_path)
                    .status()
                    .map_err(|err| UserCommandsError::Process(format!("failed to launch editor: {err}")))?;
                if !status.success() {
                    return Err(UserCommandsError::Process("editor exited with error".to_string()));
                }
                output(ctx, json!({"path": ctx.config_path}))
            } else {
                Err(UserCommandsError::Process(
                    "EDITOR is not set; please edit the config file manually".to_string(),
                ))
            }
        }
        ConfigCommand::Validate => {
            let cfg = load_config(ctx)?;
            let missing = missing_programs(&cfg);
            if !ctx.json {
                for name in &missing {
                    eprintln!("warning: command '{name}' runs a program that is not on PATH");
                }
            }
            output(
                ctx,
                json!({
                    "path": ctx.config_path,
                    "valid": true,
                    "commands": cfg.commands.len(),
                    "missing_programs": missing,
                }),
            )
        }
    }
}

fn handle_list(ctx: &Context) -> Result<(), UserCommandsError> {
    let cfg = load_config(ctx)?;
    let mut package = Package::activate(&cfg, HeadlessFactory, ProcessSpawner, EditorContext::default());
    let commands: Vec<serde_json::Value> = package
        .registry()
        .commands()
        .map(|reg| {
            let label = match &reg.action {
                host::Action::Run(spec) => spec.name.clone(),
                host::Action::DismissConsole => CANCEL_COMMAND.to_string(),
            };
            json!({"id": reg.id, "selector": reg.selector, "label": label})
        })
        .collect();
    package.deactivate();
    if ctx.json {
        return output(ctx, json!({ "commands": commands }));
    }
    if commands.is_empty() {
        println!("No commands configured.");
    }
    for entry in &commands {
        println!(
            "{}  {}",
            entry["id"].as_str().unwrap_or_default(),
            style(format!("[{}]", entry["selector"].as_str().unwrap_or_default())).dim()
        );
    }
    Ok(())
}

fn handle_menu(ctx: &Context) -> Result<(), UserCommandsError> {
    let cfg = load_config(ctx)?;
    let mut package = Package::activate(&cfg, HeadlessFactory, ProcessSpawner, EditorContext::default());
    let tree = package.registry().menu_tree();
    package.deactivate();
    if ctx.json {
        return output(ctx, json!({ "menu": tree }));
    }
    fn print_nodes(nodes: &[host::MenuNode], depth: usize) {
        for node in nodes {
            let indent = "  ".repeat(depth);
            match &node.command {
                Some(command) => println!("{indent}{} {}", node.label, style(format!("({command})")).dim()),
                None => println!("{indent}{}", node.label),
            }
            print_nodes(&node.submenu, depth + 1);
        }
    }
    print_nodes(&tree, 0);
    Ok(())
}

fn handle_env(ctx: &Context, file: Option<PathBuf>, vars: Vec<String>) -> Result<(), UserCommandsError> {
    let cfg = load_config(ctx)?;
    let mut env = editor_context(&cfg, file.as_deref())?.resolve()?;
    env.extend_from_pairs(&vars);
    if ctx.json {
        return output(ctx, json!({ "env": env.as_map() }));
    }
    for (key, value) in env.as_map() {
        println!("{{{key}}} = {value}");
    }
    Ok(())
}

fn handle_run(
    ctx: &Context,
    target: String,
    file: Option<PathBuf>,
    scopes: Vec<String>,
    vars: Vec<String>,
) -> Result<(), UserCommandsError> {
    let cfg = load_config(ctx)?;
    let context = editor_context(&cfg, file.as_deref())?;
    let scopes = active_scopes(scopes, file.is_some());
    let id = trigger_id(&target);

    if ctx.json {
        let mut package =
            Package::activate(&cfg, HeadlessFactory, ProcessSpawner, context).with_overrides(vars);
        let report = package.dispatch(&scopes, &id);
        package.deactivate();
        return match report? {
            Some(report) => output(ctx, serde_json::to_value(&report)?),
            None => output(ctx, json!({ "id": id })),
        };
    }

    let mut package = Package::activate(&cfg, TerminalFactory { erase: false }, ProcessSpawner, context)
        .with_overrides(vars);
    let report = package.dispatch(&scopes, &id);
    package.deactivate();
    report.map(|_| ())
}

fn handle_shell(ctx: &Context, file: Option<PathBuf>, vars: Vec<String>) -> Result<(), UserCommandsError> {
    if !io::stdout().is_terminal() || !io::stdin().is_terminal() {
        return Err(UserCommandsError::Process(
            "shell needs an interactive terminal".to_string(),
        ));
    }
    let mut store = ConfigStore::load(&ctx.config_path)?;
    let context = editor_context(store.current(), file.as_deref())?;
    let scopes = active_scopes(Vec::new(), file.is_some());
    let mut package = Package::activate(store.current(), TerminalFactory { erase: true }, ProcessSpawner, context)
        .with_overrides(vars);
    let theme = ColorfulTheme::default();
    let term = Term::stdout();

    let result = loop {
        match store.reload() {
            Ok(Some(cfg)) => package.config_changed(cfg),
            Ok(None) => {}
            Err(err) => eprintln!("warning: keeping previous commands: {err}"),
        }
        let entries: Vec<(String, String)> = package
            .registry()
            .menu_entries()
            .map(|entry| (entry.label.clone(), entry.command.clone()))
            .collect();
        let mut labels: Vec<&str> = entries.iter().map(|(label, _)| label.as_str()).collect();
        labels.push("Quit");
        let choice = match Select::with_theme(&theme)
            .with_prompt("Run command")
            .items(&labels)
            .default(0)
            .interact_opt()
        {
            Ok(choice) => choice,
            Err(err) => break Err(err.into()),
        };
        let Some((_, id)) = choice.and_then(|index| entries.get(index)) else {
            break Ok(());
        };
        if let Err(err) = package.dispatch(&scopes, id) {
            eprintln!("{err}");
            continue;
        }
        if package.surface().dismiss_armed() {
            term.write_line(&style("Esc to dismiss output, any other key to keep it").dim().to_string())?;
            let key = term.read_key()?;
            term.clear_last_lines(1)?;
            if key == Key::Escape {
                package.dispatch(&scopes, CANCEL_COMMAND)?;
            }
        }
    };

    log::debug!("session state: {}", package.serialize());
    package.deactivate();
    result
}

fn output(ctx: &Context, payload: serde_json::Value) -> Result<(), UserCommandsError> {
    if ctx.json {
        let wrapper = JsonResult {
            ok: true,
            result: Some(payload),
            error: None,
        };
        print_json(&wrapper)?;
    } else {
        println!("{}", payload);
    }
    Ok(())
}

fn print_json<T: Serialize>(payload: &T) -> Result<(), UserCommandsError> {
    let text = serde_json::to_string_pretty(payload)?;
    println!("{}", text);
    Ok(())
}
