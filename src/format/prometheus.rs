//! `text/plain; version=0.0.4` rendering: the classic Prometheus exposition
//! format. No exemplars, no forced decimal points, no end-of-stream marker.

use std::io::Write;

use crate::error::Result;

use super::Dialect;

pub(crate) struct PrometheusDialect;

impl Dialect for PrometheusDialect {
    fn counter_names(name: &str) -> (String, String, &'static str) {
        (name.to_string(), name.to_string(), "counter")
    }

    fn force_decimal_point() -> bool {
        false
    }

    fn supports_exemplars() -> bool {
        false
    }

    fn write_terminator(_writer: &mut impl Write) -> Result<()> {
        Ok(())
    }
}
