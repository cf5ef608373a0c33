//! Diagnostic Packages
//!
//! A package bundles an init sequence, run once per session establishment,
//! with a cyclic sequence of diagnostic commands repeated forever. The
//! field set of a package is derived from its cyclic commands.

pub mod catalog;
mod error;

pub use catalog::Catalog;
pub use error::CatalogError;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::codec::Field;
use crate::command::{Command, DiagCommand};

/// Named bundle of init and cyclic commands
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "PackageDef")]
pub struct Package {
    name: String,
    description: String,
    init_commands: Vec<Command>,
    cyclic_commands: Vec<DiagCommand>,
    #[serde(skip)]
    fields: Vec<Field>,
}

/// Unvalidated package as read from a catalog file
#[derive(Deserialize)]
struct PackageDef {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    init_commands: Vec<Command>,
    cyclic_commands: Vec<DiagCommand>,
}

impl TryFrom<PackageDef> for Package {
    type Error = CatalogError;

    fn try_from(def: PackageDef) -> Result<Self, Self::Error> {
        Package::new(def.name, def.description, def.init_commands, def.cyclic_commands)
    }
}

impl Package {
    /// Create a package, deriving its field set.
    ///
    /// Fails if `cyclic_commands` is empty or if two different fields share
    /// a key.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        init_commands: Vec<Command>,
        cyclic_commands: Vec<DiagCommand>,
    ) -> Result<Self, CatalogError> {
        let name = name.into();
        if cyclic_commands.is_empty() {
            return Err(CatalogError::EmptyCycle(name));
        }
        let fields = field_union(&name, &cyclic_commands)?;

        Ok(Self {
            name,
            description: description.into(),
            init_commands,
            cyclic_commands,
            fields,
        })
    }

    /// Package name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Commands executed once per session establishment
    pub fn init_commands(&self) -> &[Command] {
        &self.init_commands
    }

    /// Commands repeated forever, never empty
    pub fn cyclic_commands(&self) -> &[DiagCommand] {
        &self.cyclic_commands
    }

    /// Fields of all cyclic commands, deduplicated by key in first-occurrence order
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Keys of [`Package::fields`], in order
    pub fn field_keys(&self) -> Vec<&str> {
        self.fields.iter().map(Field::key).collect()
    }

    /// Endless cycle over the cyclic commands, starting from the first
    pub fn command_cycle(&self) -> CommandCycle<'_> {
        CommandCycle {
            commands: &self.cyclic_commands,
            position: 0,
        }
    }
}

fn field_union(package: &str, commands: &[DiagCommand]) -> Result<Vec<Field>, CatalogError> {
    let mut fields: Vec<Field> = Vec::new();
    let mut seen: HashMap<&str, usize> = HashMap::new();

    for field in commands.iter().flat_map(DiagCommand::fields) {
        match seen.get(field.key()) {
            Some(&idx) if fields[idx] != *field => {
                return Err(CatalogError::ConflictingField {
                    package: package.to_string(),
                    key: field.key().to_string(),
                });
            }
            Some(_) => {}
            None => {
                seen.insert(field.key(), fields.len());
                fields.push(field.clone());
            }
        }
    }

    Ok(fields)
}

/// Infinite, restartable cycle over a package's cyclic commands
#[derive(Debug, Clone)]
pub struct CommandCycle<'a> {
    commands: &'a [DiagCommand],
    position: usize,
}

impl<'a> CommandCycle<'a> {
    /// Next command; wraps around after the last one
    pub fn next_command(&mut self) -> &'a DiagCommand {
        let command = &self.commands[self.position];
        self.position = (self.position + 1) % self.commands.len();
        command
    }

    /// Start over from the first command
    pub fn reset(&mut self) {
        self.position = 0;
    }
}

impl<'a> Iterator for CommandCycle<'a> {
    type Item = &'a DiagCommand;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_command())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (usize::MAX, None)
    }
}
