//! `application/openmetrics-text; version=1.0.0` rendering: the `_total`
//! counter-suffix convention, exemplars, forced decimal points, and the
//! `# EOF` terminator.

use std::io::Write;

use crate::error::Result;

use super::Dialect;

pub(crate) struct OpenMetricsDialect;

impl Dialect for OpenMetricsDialect {
    fn counter_names(name: &str) -> (String, String, &'static str) {
        match name.strip_suffix("_total") {
            Some(stripped) => (stripped.to_string(), name.to_string(), "counter"),
            None => (name.to_string(), name.to_string(), "unknown"),
        }
    }

    fn force_decimal_point() -> bool {
        true
    }

    fn supports_exemplars() -> bool {
        true
    }

    fn write_terminator(writer: &mut impl Write) -> Result<()> {
        writer.write_all(b"# EOF\n")?;
        Ok(())
    }
}
