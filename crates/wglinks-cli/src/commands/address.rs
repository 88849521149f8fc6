//! Address command implementation.

use std::io::Write;

use wglinks::{BaseIpv4, allocate};

use crate::cli::AddressArgs;
use crate::error::CliError;
use crate::output::{AddressInfo, OutputFormat};

/// Address command executor.
#[derive(Debug, Default)]
pub struct AddressCommand;

impl AddressCommand {
    /// Create a new address command.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Execute the address command.
    ///
    /// # Errors
    ///
    /// Returns an error if the base or the result is not a private address.
    pub fn execute<W: Write>(&self, writer: &mut W, format: &OutputFormat, args: &AddressArgs) -> Result<(), CliError> {
        let address = allocate("address", BaseIpv4::from(args.base), args.index)?;
        let info = AddressInfo {
            base: args.base,
            index: args.index,
            address,
        };
        format.write(writer, &info)
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn run(base: Ipv4Addr, index: u32) -> Result<String, CliError> {
        let mut out = Vec::new();
        AddressCommand::new().execute(&mut out, &OutputFormat::default(), &AddressArgs { base, index })?;
        Ok(String::from_utf8(out).expect("utf8"))
    }

    #[test]
    fn carries_into_the_next_octet() {
        let out = run(Ipv4Addr::new(10, 0, 0, 255), 1).expect("allocate");
        assert_eq!(out, "10.0.1.0\n");
    }

    #[test]
    fn public_base_is_rejected() {
        let err = run(Ipv4Addr::new(8, 8, 8, 8), 1).expect_err("public base");
        assert!(err.to_string().contains("not a private ipv4 address"));
    }
}
