use crate::config::{CommandSpec, Config};
use crate::environment::EditorContext;
use crate::host::{command_id, Action, Disposable, Registry, MENU_PATH};
use crate::runner::{self, ExitInfo, Spawner};
use crate::substitute::{substitute, substitute_str, VariableEnvironment};
use crate::surface::{LogLine, LogSurface, PanelFactory};
use crate::UserCommandsError;
use serde::Serialize;
use serde_json::json;
use serde_yaml::Value;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub id: String,
    pub command: String,
    pub arguments: Vec<String>,
    pub options: serde_json::Value,
    pub exit: Option<ExitInfo>,
    pub elapsed_secs: Option<f64>,
    pub lines: Vec<LogLine>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubstitutedSpec {
    pub command: String,
    pub arguments: Vec<String>,
    pub options: Value,
}

impl CommandSpec {
    pub fn substituted(&self, env: &VariableEnvironment) -> SubstitutedSpec {
        SubstitutedSpec {
            command: substitute_str(&self.command, env),
            arguments: self
                .arguments
                .iter()
                .map(|arg| substitute_str(arg, env))
                .collect(),
            options: substitute(&Value::Mapping(self.options.clone()), env),
        }
    }
}

pub struct Package<F: PanelFactory, S: Spawner> {
    registry: Registry,
    surface: LogSurface<F>,
    spawner: S,
    context: EditorContext,
    overrides: Vec<String>,
    registered: Vec<Disposable>,
}

impl<F: PanelFactory, S: Spawner> Package<F, S> {
    pub fn activate(config: &Config, factory: F, spawner: S, context: EditorContext) -> Self {
        let mut package = Self {
            registry: Registry::new(),
            surface: LogSurface::new(factory),
            spawner,
            context,
            overrides: Vec::new(),
            registered: Vec::new(),
        };
        package.config_changed(config);
        package
    }

    pub fn with_overrides(mut self, overrides: Vec<String>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn config_changed(&mut self, config: &Config) {
        for handle in self.registered.drain(..) {
            self.registry.dispose(handle);
        }
        for spec in &config.commands {
            let id = command_id(&spec.name);
            let trigger = self
                .registry
                .add_command(&spec.selector, &id, Action::Run(spec.clone()));
            let entry = self.registry.add_menu(&MENU_PATH, &spec.name, &id);
            self.registered.push(trigger);
            self.registered.push(entry);
        }
        log::info!("registered {} user commands", config.commands.len());
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn surface(&self) -> &LogSurface<F> {
        &self.surface
    }

    pub fn environment(&self) -> VariableEnvironment {
        let mut env = match self.context.resolve() {
            Ok(env) => env,
            Err(err) => {
                log::warn!("{err}");
                VariableEnvironment::new()
            }
        };
        env.extend_from_pairs(&self.overrides);
        env
    }

    // Run the trigger `id` if one matches `scopes`. `Ok(None)` means the trigger was
    // handled without starting a process, e.g. a dismiss.
    pub fn dispatch(
        &mut self,
        scopes: &[String],
        id: &str,
    ) -> Result<Option<RunReport>, UserCommandsError> {
        let action = self
            .registry
            .lookup(scopes, id)
            .cloned()
            .ok_or_else(|| UserCommandsError::UnknownCommand(id.to_string()))?;
        match action {
            Action::Run(spec) => self.invoke(&spec).map(Some),
            Action::DismissConsole => {
                self.surface.fire_dismiss(&mut self.registry);
                Ok(None)
            }
        }
    }

    // Runs to completion before returning, so invocations never overlap.
    pub fn invoke(&mut self, spec: &CommandSpec) -> Result<RunReport, UserCommandsError> {
        let env = self.environment();
        let resolved = spec.substituted(&env);
        log::debug!("invoking {} as {:?}", spec.name, resolved);
        let handle = runner::run(
            &mut self.surface,
            &mut self.registry,
            &self.spawner,
            &resolved.command,
            &resolved.arguments,
            &resolved.options,
        )?;
        let outcome = handle.pump(&mut self.surface, &mut self.registry)?;
        Ok(RunReport {
            id: command_id(&spec.name),
            command: resolved.command,
            arguments: resolved.arguments,
            options: serde_json::to_value(&resolved.options)?,
            exit: outcome.exit,
            elapsed_secs: outcome.elapsed_secs,
            lines: self.surface.lines().to_vec(),
        })
    }

    pub fn deactivate(&mut self) {
        self.surface.destroy(&mut self.registry);
        for handle in self.registered.drain(..) {
            self.registry.dispose(handle);
        }
    }

    pub fn serialize(&self) -> serde_json::Value {
        json!({})
    }
}
