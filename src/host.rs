use crate::config::CommandSpec;
use serde::Serialize;
use std::collections::BTreeMap;

pub const NAMESPACE: &str = "atom-user-commands";
pub const CANCEL_COMMAND: &str = "core:cancel";
pub const WORKSPACE_SELECTOR: &str = "atom-workspace";
pub const EDITOR_SELECTOR: &str = "atom-text-editor";
pub const MENU_PATH: [&str; 2] = ["Packages", "Atom User Commands"];

pub fn command_id(name: &str) -> String {
    format!("{NAMESPACE}:{name}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Disposable(u64);

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Run(CommandSpec),
    DismissConsole,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub id: String,
    pub selector: String,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuEntry {
    pub path: Vec<String>,
    pub label: String,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuNode {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub submenu: Vec<MenuNode>,
}

#[derive(Debug, Default)]
pub struct Registry {
    next_handle: u64,
    commands: BTreeMap<Disposable, Registration>,
    menus: BTreeMap<Disposable, MenuEntry>,
}

// A selector is a comma-separated list of scopes; `*` matches everything.
pub fn selector_matches(selector: &str, scopes: &[String]) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .any(|part| part == "*" || scopes.iter().any(|scope| scope == part))
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> Disposable {
        self.next_handle += 1;
        Disposable(self.next_handle)
    }

    pub fn add_command(&mut self, selector: &str, id: &str, action: Action) -> Disposable {
        let handle = self.next();
        log::debug!("registered command {id} for {selector}");
        self.commands.insert(
            handle,
            Registration {
                id: id.to_string(),
                selector: selector.to_string(),
                action,
            },
        );
        handle
    }

    pub fn add_menu(&mut self, path: &[&str], label: &str, command: &str) -> Disposable {
        let handle = self.next();
        self.menus.insert(
            handle,
            MenuEntry {
                path: path.iter().map(|part| part.to_string()).collect(),
                label: label.to_string(),
                command: command.to_string(),
            },
        );
        handle
    }

    pub fn dispose(&mut self, handle: Disposable) -> bool {
        self.commands.remove(&handle).is_some() || self.menus.remove(&handle).is_some()
    }

    pub fn commands(&self) -> impl Iterator<Item = &Registration> {
        self.commands.values()
    }

    pub fn menu_entries(&self) -> impl Iterator<Item = &MenuEntry> {
        self.menus.values()
    }

    #[cfg(test)]
    pub fn count_command(&self, id: &str) -> usize {
        self.commands.values().filter(|reg| reg.id == id).count()
    }

    // The most recently registered command with a matching id and selector.
    pub fn lookup(&self, scopes: &[String], id: &str) -> Option<&Action> {
        self.commands
            .values()
            .rev()
            .find(|reg| reg.id == id && selector_matches(&reg.selector, scopes))
            .map(|reg| &reg.action)
    }

    pub fn menu_tree(&self) -> Vec<MenuNode> {
        let mut roots: Vec<MenuNode> = Vec::new();
        for entry in self.menus.values() {
            let mut level = &mut roots;
            for label in &entry.path {
                let index = match level.iter().position(|node| &node.label == label) {
                    Some(index) => index,
                    None => {
                        level.push(MenuNode {
                            label: label.clone(),
                            command: None,
                            submenu: Vec::new(),
                        });
                        level.len() - 1
                    }
                };
                level = &mut level[index].submenu;
            }
            level.push(MenuNode {
                label: entry.label.clone(),
                command: Some(entry.command.clone()),
                submenu: Vec::new(),
            });
        }
        roots
    }
}
