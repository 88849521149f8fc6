//! Output formatting for CLI commands.
//!
//! Supports table (human-readable) and JSON output formats.

use std::io::Write;
use std::net::Ipv4Addr;

use serde::Serialize;
use wglinks::{PassOutcome, PhysicalSpec};

use crate::cli::Format;
use crate::error::CliError;

/// Output formatter that handles both table and JSON output.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Write a serializable value to the output.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> Result<(), CliError>
    where
        W: Write,
        T: Serialize + TableDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)
                    .map_err(|e| CliError::Format(format!("JSON serialization failed: {e}")))?;
                writeln!(writer)?;
            }
            Format::Table => {
                value.write_table(writer)?;
            }
        }
        Ok(())
    }

    /// Write a serializable value to a string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_string<T>(&self, value: &T) -> Result<String, CliError>
    where
        T: Serialize + TableDisplay,
    {
        let mut buf = Vec::new();
        self.write(&mut buf, value)?;
        String::from_utf8(buf).map_err(|e| CliError::Format(format!("UTF-8 error: {e}")))
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new(Format::Table)
    }
}

/// Trait for types that can be displayed as a table.
pub trait TableDisplay {
    /// Write the value as a human-readable table.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError>;
}

/// A computed tunnel address.
#[derive(Debug, Clone, Serialize)]
pub struct AddressInfo {
    /// Base address.
    pub base: Ipv4Addr,
    /// Ordinal index.
    pub index: u32,
    /// Resulting tunnel address.
    pub address: Ipv4Addr,
}

impl TableDisplay for AddressInfo {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "{}", self.address)?;
        Ok(())
    }
}

/// The physical configuration of a fleet.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct SpecView<'a>(pub &'a PhysicalSpec);

impl TableDisplay for SpecView<'_> {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        if self.0.is_empty() {
            writeln!(writer, "No endpoints ready for wg links.")?;
            return Ok(());
        }

        writeln!(
            writer,
            "{:<20} {:<18} {:<8} {:<8} PEERS",
            "ENDPOINT", "ADDRESS", "IFACE", "PORT"
        )?;
        writeln!(writer, "{}", "─".repeat(72))?;
        for (name, config) in self.0 {
            let address = config
                .interface
                .address
                .first()
                .map_or_else(|| "-".to_string(), ToString::to_string);
            let peers: Vec<String> = config
                .interface
                .peers
                .iter()
                .map(|p| p.endpoint.clone())
                .collect();
            writeln!(
                writer,
                "{:<20} {:<18} {:<8} {:<8} {}",
                name,
                address,
                config.interface_name,
                config.interface.listen_port,
                if peers.is_empty() { "-".to_string() } else { peers.join(", ") }
            )?;
        }
        Ok(())
    }
}

/// Summary of a convergence pass.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct PassView<'a>(pub &'a PassOutcome);

impl TableDisplay for PassView<'_> {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        let outcome = self.0;
        writeln!(writer, "Provisioning")?;
        writeln!(writer, "══════════════════════════════════")?;
        if outcome.provisioned.is_empty() {
            writeln!(writer, "  (no reachable endpoints)")?;
        }
        for (name, result) in &outcome.provisioned {
            let result = serde_json::to_value(result)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            writeln!(writer, "  {name:<20} {result}")?;
        }
        writeln!(writer)?;
        writeln!(writer, "Preshared keys")?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "  Rewritten:      {}", list(&outcome.reconciled.rewritten))?;
        writeln!(writer, "  Skipped:        {}", list(&outcome.reconciled.skipped))?;
        writeln!(writer)?;
        SpecView(&outcome.spec).write_table(writer)
    }
}

fn list(names: &[String]) -> String {
    if names.is_empty() {
        "-".to_string()
    } else {
        names.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_table_is_bare_address() {
        let info = AddressInfo {
            base: Ipv4Addr::new(10, 0, 0, 0),
            index: 3,
            address: Ipv4Addr::new(10, 0, 0, 3),
        };
        let out = OutputFormat::default().to_string(&info).expect("format");
        assert_eq!(out, "10.0.0.3\n");
    }

    #[test]
    fn address_json_has_all_fields() {
        let info = AddressInfo {
            base: Ipv4Addr::new(10, 0, 0, 0),
            index: 3,
            address: Ipv4Addr::new(10, 0, 0, 3),
        };
        let out = OutputFormat::new(Format::Json).to_string(&info).expect("format");
        let json: serde_json::Value = serde_json::from_str(&out).expect("json");
        assert_eq!(json["address"], "10.0.0.3");
        assert_eq!(json["index"], 3);
    }

    #[test]
    fn empty_spec_table() {
        let spec = PhysicalSpec::new();
        let out = OutputFormat::default().to_string(&SpecView(&spec)).expect("format");
        assert!(out.contains("No endpoints ready"));
    }

    #[test]
    fn empty_spec_json_is_empty_object() {
        let spec = PhysicalSpec::new();
        let out = OutputFormat::new(Format::Json)
            .to_string(&SpecView(&spec))
            .expect("format");
        assert_eq!(out.trim(), "{}");
    }
}
