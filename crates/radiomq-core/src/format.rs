//! Payload formats keyed by the JLL payload type
//!
//! Nodes tag each packet with a 7-bit payload type. Known types get a named
//! renderer producing a human-readable line; anything else renders as the
//! plain list of varint-decoded numbers.

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;

use crate::varint;

/// GPS navigation fix
pub const TYPE_GPS_NAV: u8 = 10;

/// Renders a decoded payload
pub type RenderFn = fn(&[i64]) -> Option<String>;

/// A named payload format
#[derive(Debug, Clone, Copy)]
pub struct PayloadFormat {
    /// Format name
    pub name: &'static str,
    /// Renderer, `None` when the values don't fit the format
    pub render: RenderFn,
}

/// Registry of payload formats
#[derive(Debug, Clone)]
pub struct FormatRegistry {
    formats: HashMap<u8, PayloadFormat>,
}

impl Default for FormatRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(
            TYPE_GPS_NAV,
            PayloadFormat {
                name: "gps-nav",
                render: render_gps_nav,
            },
        );
        registry
    }
}

impl FormatRegistry {
    /// Registry with no formats
    pub fn empty() -> Self {
        Self {
            formats: HashMap::new(),
        }
    }

    /// Add or replace the format for `payload_type`
    pub fn register(&mut self, payload_type: u8, format: PayloadFormat) {
        self.formats.insert(payload_type, format);
    }

    /// Look up a format
    pub fn get(&self, payload_type: u8) -> Option<&PayloadFormat> {
        self.formats.get(&payload_type)
    }

    /// Name of the format for `payload_type`, if known
    pub fn name(&self, payload_type: u8) -> Option<&'static str> {
        self.get(payload_type).map(|f| f.name)
    }

    /// Render already-decoded values
    pub fn render_values(&self, payload_type: u8, values: &[i64]) -> String {
        self.get(payload_type)
            .and_then(|f| (f.render)(values))
            .unwrap_or_else(|| render_numbers(values))
    }

    /// Varint-decode `payload` and render it
    pub fn render(&self, payload_type: u8, payload: &[u8]) -> String {
        if payload.is_empty() {
            return "<empty>".to_string();
        }
        self.render_values(payload_type, &varint::decode(payload))
    }
}

/// Comma separated list of numbers
pub fn render_numbers(values: &[i64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// GPS navigation fix, 8 values:
/// UTC time as HHMMSS.SSS scaled by 1000, A/V status, latitude and
/// longitude in micro-degrees, speed in 1/10000 knots, course and magnetic
/// variation in 1/10000 degrees, date as DDMMYY.
fn render_gps_nav(v: &[i64]) -> Option<String> {
    if v.len() != 8 {
        return None;
    }
    let at = gps_date_time(v[6], v[0])?;
    let status = if v[1] == i64::from(b'A') { "OK" } else { "WARN" };
    Some(format!(
        "{} {} <{:.6} {:.6}> {:.4}kts {:.1}° mag{:.1}°",
        at.format("%Y-%m-%d %H:%M:%S%.3f"),
        status,
        v[2] as f64 / 1e6,
        v[3] as f64 / 1e6,
        v[4] as f64 / 1e4,
        v[5] as f64 / 1e4,
        v[7] as f64 / 1e4,
    ))
}

fn gps_date_time(date: i64, time: i64) -> Option<NaiveDateTime> {
    let secs = time / 1000;
    let day = NaiveDate::from_ymd_opt(
        2000 + (date % 100) as i32,
        ((date / 100) % 100) as u32,
        (date / 10000) as u32,
    )?;
    day.and_hms_milli_opt(
        (secs / 10000) as u32,
        ((secs / 100) % 100) as u32,
        (secs % 100) as u32,
        (time % 1000) as u32,
    )
}
