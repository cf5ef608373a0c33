//! Package catalog
//!
//! The built-in catalog targets a common-rail diesel ECU reached through an
//! ELM327-compatible adapter over KWP2000 (ISO 14230 fast init).

use serde::{Deserialize, Serialize};
use std::num::NonZeroU64;
use std::path::Path;

use super::{CatalogError, Package};
use crate::codec::Field;
use crate::command::{Command, DiagCommand, DEFAULT_COMMAND_TIMEOUT_MS};

/// Timeout for adapter reset, which answers slowly
const RESET_TIMEOUT_MS: u64 = 7500;

/// Timeout for `21 xx` data requests
const DATA_TIMEOUT_MS: u64 = 1000;

/// Ordered set of packages plus the adapter verification sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "CatalogDef")]
pub struct Catalog {
    verification: Vec<Command>,
    packages: Vec<Package>,
}

#[derive(Deserialize)]
struct CatalogDef {
    #[serde(default)]
    verification: Option<Vec<Command>>,
    packages: Vec<Package>,
}

impl TryFrom<CatalogDef> for Catalog {
    type Error = CatalogError;

    fn try_from(def: CatalogDef) -> Result<Self, Self::Error> {
        let verification = def.verification.unwrap_or_else(verification_commands);
        Catalog::new(verification, def.packages)
    }
}

impl Catalog {
    /// Create a catalog. Package names must be unique (case-insensitive).
    pub fn new(verification: Vec<Command>, packages: Vec<Package>) -> Result<Self, CatalogError> {
        for (idx, pkg) in packages.iter().enumerate() {
            if packages[..idx]
                .iter()
                .any(|other| other.name().eq_ignore_ascii_case(pkg.name()))
            {
                return Err(CatalogError::DuplicatePackage(pkg.name().to_string()));
            }
        }
        Ok(Self {
            verification,
            packages,
        })
    }

    /// The built-in catalog
    pub fn builtin() -> Result<Self, CatalogError> {
        builtin()
    }

    /// Load a catalog from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Parse a catalog from JSON text
    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Commands used to check that an adapter is present and answering
    pub fn verification(&self) -> &[Command] {
        &self.verification
    }

    /// All packages, in catalog order
    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    /// Find a package by name, ignoring case
    pub fn find(&self, name: &str) -> Option<&Package> {
        self.packages
            .iter()
            .find(|pkg| pkg.name().eq_ignore_ascii_case(name))
    }
}

fn timeout(ms: u64) -> NonZeroU64 {
    NonZeroU64::new(ms).unwrap_or(NonZeroU64::MIN)
}

/// Adapter verification sequence: a reset must identify an ELM327
pub fn verification_commands() -> Vec<Command> {
    vec![Command::with_timeout("ATZ", Some("ELM327"), timeout(RESET_TIMEOUT_MS))]
}

/// Adapter setup, KWP fast init and security access shared by all ECU packages
pub fn init_commands() -> Vec<Command> {
    let cmd = |request: &str, prefix: &str| {
        Command::with_timeout(request, Some(prefix), timeout(DEFAULT_COMMAND_TIMEOUT_MS))
    };
    vec![
        Command::with_timeout("ATZ", Some("ELM327"), timeout(RESET_TIMEOUT_MS)),
        cmd("ATSP5", "OK"),
        cmd("ATWM8115F13E", "OK"),
        cmd("ATSH8115F1", "OK"),
        cmd("ATFI", "BUS INIT: OK"),
        cmd("81", "C1 EF 8F"),
        cmd("27 01", "67 01"),
        cmd("27 02 CD 46", "7F 27"),
        cmd("31 25 00", "71 25"),
    ]
}

/// `21 xx` local identifier read, answered by `61 xx ...`
fn read_local_id(id: u8, fields: Vec<Field>) -> DiagCommand {
    DiagCommand::new(
        Command::with_timeout(
            format!("21 {:02X}", id),
            Some(&format!("61 {:02X} ", id)),
            timeout(DATA_TIMEOUT_MS),
        ),
        fields,
    )
}

fn correction(key: &str, description: &str, start: usize) -> Result<Field, CatalogError> {
    Field::numeric(key, description, start, 2, 0.0, 100.0, "+#.##;-#.##")
}

fn rpm() -> Result<Field, CatalogError> {
    Field::word("rpm", "RPM", 2, "#### rpm")
}

fn injection_quantity() -> Result<Field, CatalogError> {
    Field::numeric("iq", "IQ", 4, 2, 0.0, 100.0, "##.# mg")
}

fn injector_corrections() -> Result<Package, CatalogError> {
    Package::new(
        "Injector corrections",
        "Injector correction coefficients, IQ and RPM.",
        init_commands(),
        vec![read_local_id(
            0x28,
            vec![
                rpm()?,
                injection_quantity()?,
                correction("inj1_cor", "Injector 1 correction", 18)?,
                correction("inj2_cor", "Injector 2 correction", 20)?,
                correction("inj3_cor", "Injector 3 correction", 22)?,
                correction("inj4_cor", "Injector 4 correction", 24)?,
                correction("inj5_cor", "Injector 5 correction", 26)?,
            ],
        )],
    )
}

fn rail_pressure() -> Result<Package, CatalogError> {
    Package::new(
        "Rail pressure",
        "Rail pressure - actual and specified.",
        init_commands(),
        vec![
            read_local_id(
                0x12,
                vec![Field::numeric("rail_actual", "Rail pressure", 20, 2, 0.0, 10.0, "####.# bar")?],
            ),
            read_local_id(
                0x22,
                vec![Field::numeric(
                    "rail_spec",
                    "Rail pressure specified",
                    18,
                    2,
                    0.0,
                    10.0,
                    "####.# bar",
                )?],
            ),
        ],
    )
}

fn mass_air_flow() -> Result<Package, CatalogError> {
    Package::new(
        "MAF",
        "MAF readings - actual and specified",
        init_commands(),
        vec![read_local_id(
            0x20,
            vec![
                Field::word("maf_actual", "MAF actual", 14, "#")?,
                Field::word("maf_spec", "MAF specified", 16, "#")?,
            ],
        )],
    )
}

fn manifold_pressure() -> Result<Package, CatalogError> {
    Package::new(
        "MAP",
        "Manifold air pressure - actual and specified.",
        init_commands(),
        vec![
            read_local_id(0x12, vec![Field::word("map_actual", "MAP actual", 18, "#### mbar")?]),
            read_local_id(0x22, vec![Field::word("map_spec", "MAP specified", 16, "#### mbar")?]),
        ],
    )
}

fn misc() -> Result<Package, CatalogError> {
    Package::new(
        "Misc data",
        "IAT, TPS, coolant temperature, IQ, RPM.",
        init_commands(),
        vec![
            read_local_id(
                0x12,
                vec![
                    Field::numeric("coolant", "Coolant (C)", 2, 2, -273.1, 10.0, "## C")?,
                    Field::numeric("iat", "IAT", 4, 2, -273.1, 10.0, "## C")?,
                    Field::numeric("tps", "TPS", 14, 2, 0.0, 100.0, "# '%'")?,
                    // Not confirmed against a workshop tool
                    Field::word("aap", "Atmospheric pressure (unconfirmed)", 30, "# mbar")?,
                ],
            ),
            read_local_id(0x28, vec![rpm()?, injection_quantity()?]),
        ],
    )
}

fn battery_voltage() -> Result<Package, CatalogError> {
    // Answered by the adapter itself, so no ECU init is needed
    Package::new(
        "Battery voltage",
        "Battery voltage",
        Vec::new(),
        vec![DiagCommand::new(
            Command::with_timeout("ATRV", None, timeout(DATA_TIMEOUT_MS)),
            vec![Field::text("Voltage", "Battery voltage")],
        )],
    )
}

/// Build the built-in catalog
pub fn builtin() -> Result<Catalog, CatalogError> {
    Catalog::new(
        verification_commands(),
        vec![
            injector_corrections()?,
            rail_pressure()?,
            mass_air_flow()?,
            manifold_pressure()?,
            misc()?,
            battery_voltage()?,
        ],
    )
}
