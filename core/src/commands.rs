//! Console command dispatch.
//!
//! Commands are registered in named maps by their owners; an unmatched first
//! token falls back to the settings store: zero arguments prints the value,
//! one argument sets it.

use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use crate::settings::Settings;

pub type CommandsArguments = Vec<String>;
pub type CommandFn = Box<dyn Fn(&CommandsArguments)>;
pub type CommandsMap = BTreeMap<String, CommandFn>;
pub type CommandsMapPtr = Rc<CommandsMap>;

pub struct CommandsProcessor {
    commands_maps: Vec<Weak<CommandsMap>>,
}

/// First token lower-cased, rest split on whitespace with double-quoted
/// arguments kept whole (`\"` escapes a quote).
pub fn parse_command(command_string: &str) -> (String, CommandsArguments) {
    let mut chars = command_string.chars().peekable();
    let mut name = String::new();
    let mut args = Vec::new();

    while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
        chars.next();
    }
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            break;
        }
        name.extend(c.to_lowercase());
        chars.next();
    }

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut arg = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '"' => break,
                    '\\' if chars.peek() == Some(&'"') => {
                        arg.push('"');
                        chars.next();
                    }
                    _ => arg.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                arg.push(c);
                chars.next();
            }
        }
        args.push(arg);
    }

    (name, args)
}

impl CommandsProcessor {
    pub fn new() -> Self {
        CommandsProcessor {
            commands_maps: Vec::new(),
        }
    }

    /// The processor holds only a weak reference; dropping the owner's map
    /// unregisters its commands.
    pub fn register_commands(&mut self, commands: &CommandsMapPtr) {
        self.commands_maps.push(Rc::downgrade(commands));
    }

    pub fn process_command(&mut self, command_string: &str, settings: &mut Settings) {
        let (name, args) = parse_command(command_string);
        if name.is_empty() {
            return;
        }

        self.commands_maps.retain(|m| m.strong_count() > 0);

        for map in &self.commands_maps {
            if let Some(map) = map.upgrade() {
                if let Some(command) = map.get(&name) {
                    command(&args);
                    return;
                }
            }
        }

        if settings.is_value(&name) {
            if args.is_empty() {
                log::info!("\"{}\" is \"{}\"", name, settings.get_string(&name, ""));
            } else {
                settings.set_string(&name, &args[0]);
            }
        } else {
            log::info!("{}: command not found", name);
        }
    }

    /// Longest unambiguous completion of the current command name. Multiple
    /// candidates are listed to the log.
    pub fn try_complete_command(&mut self, command_string: &str) -> String {
        let (command, _) = parse_command(command_string);

        let mut candidates: Vec<String> = Vec::new();
        self.commands_maps.retain(|m| m.strong_count() > 0);
        for map in &self.commands_maps {
            if let Some(map) = map.upgrade() {
                for name in map.keys() {
                    if name.starts_with(&command) {
                        candidates.push(name.clone());
                    }
                }
            }
        }

        if candidates.is_empty() {
            return command;
        }

        if candidates.len() > 1 {
            log::info!(">{}", command);
            candidates.sort();
            for candidate in &candidates {
                log::info!("  {}", candidate);
            }
        }

        let first = &candidates[0];
        let mut pos = command.len();
        'outer: while pos < first.len() {
            let c = first.as_bytes()[pos];
            for candidate in &candidates {
                if pos >= candidate.len() || candidate.as_bytes()[pos] != c {
                    break 'outer;
                }
            }
            pos += 1;
        }

        first[..pos].to_string()
    }
}

impl Default for CommandsProcessor {
    fn default() -> Self {
        Self::new()
    }
}
