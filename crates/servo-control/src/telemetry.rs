//! Named telemetry channels read through the diagnostic channel.
//!
//! The device describes each channel with `tel schema <name>`:
//!
//! ```text
//! version 3
//! format binary
//! field position f32
//! field fault i8
//! ```
//!
//! `tel get <name>` then answers either with `version N` followed by `<field> <value>`
//! lines (text channels) or with a u32 LE version followed by the encoded fields
//! (binary channels). Integer fields are plain counts and are not scaled.

use crate::cadence::Cadence;
use crate::channel::DiagnosticChannel;
use crate::codec::decode_with;
use crate::{ControlError, Resolution, Result};
use serde::{Deserialize, Serialize};
use servo_transport::DeviceId;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelFormat {
    Text,
    Binary,
}

impl ChannelFormat {
    fn as_str(self) -> &'static str {
        match self {
            ChannelFormat::Text => "text",
            ChannelFormat::Binary => "binary",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySchema {
    pub version: u32,
    pub format: ChannelFormat,
    pub fields: Vec<(String, Resolution)>,
}

impl TelemetrySchema {
    pub fn new(version: u32, format: ChannelFormat) -> Self {
        Self {
            version,
            format,
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: &str, resolution: Resolution) -> Self {
        self.fields.push((name.to_string(), resolution));
        self
    }

    pub fn resolution(&self, field: &str) -> Option<Resolution> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, res)| *res)
    }

    /// Parse a `tel schema` reply.
    pub fn parse(text: &str) -> Result<Self> {
        let mut version = None;
        let mut format = None;
        let mut fields = Vec::new();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            match tokens.as_slice() {
                ["version", v] => version = v.parse::<u32>().ok(),
                ["format", "text"] => format = Some(ChannelFormat::Text),
                ["format", "binary"] => format = Some(ChannelFormat::Binary),
                ["field", name, res] => {
                    let res = res
                        .parse::<Resolution>()
                        .map_err(|e| ControlError::protocol(e, text.as_bytes()))?;
                    fields.push((name.to_string(), res));
                }
                ["OK"] => {}
                _ => {
                    return Err(ControlError::protocol(
                        format!("unexpected schema line: {line}"),
                        text.as_bytes(),
                    ))
                }
            }
        }
        match (version, format) {
            (Some(version), Some(format)) => Ok(Self {
                version,
                format,
                fields,
            }),
            _ => Err(ControlError::protocol(
                "schema without version or format",
                text.as_bytes(),
            )),
        }
    }

    pub fn to_text(&self) -> String {
        let mut out = format!("version {}\nformat {}\n", self.version, self.format.as_str());
        for (name, res) in &self.fields {
            out.push_str(&format!("field {name} {res}\n"));
        }
        out
    }
}

/// One decoded field. Integer fields stay integers; `Absent` is the device's "no value".
///
/// Serialized untagged, so `I64` must come before `F64` for integers to read back as
/// integers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TelemetryValue {
    I64(i64),
    F64(f64),
    Absent,
}

impl TelemetryValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TelemetryValue::F64(v) => Some(*v),
            TelemetryValue::I64(v) => Some(*v as f64),
            TelemetryValue::Absent => None,
        }
    }

    fn parse(token: &str, resolution: Resolution) -> Option<Self> {
        if token.eq_ignore_ascii_case("nan") {
            return Some(TelemetryValue::Absent);
        }
        match resolution {
            Resolution::Float32 => token.parse::<f64>().ok().map(TelemetryValue::F64),
            _ => token.parse::<i64>().ok().map(TelemetryValue::I64),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub channel: String,
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
    pub fields: BTreeMap<String, TelemetryValue>,
}

impl TelemetryRecord {
    pub fn get(&self, field: &str) -> Option<&TelemetryValue> {
        self.fields.get(field)
    }

    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(TelemetryValue::as_f64)
    }
}

#[derive(Default)]
struct Cache {
    channels: Option<Vec<String>>,
    schemas: HashMap<String, TelemetrySchema>,
}

enum Fetched {
    Record(TelemetryRecord),
    Stale(u32),
}

/// Reads named telemetry channels from one device, caching the channel list and
/// schemas until the device reports a different schema version.
pub struct TelemetryReader {
    channel: Arc<DiagnosticChannel>,
    device: DeviceId,
    cache: Mutex<Cache>,
}

impl TelemetryReader {
    pub fn new(channel: Arc<DiagnosticChannel>, device: DeviceId) -> Self {
        Self {
            channel,
            device,
            cache: Mutex::new(Cache::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Cache> {
        self.cache.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Channel names, from the cache when available.
    pub fn channels(&self) -> Result<Vec<String>> {
        if let Some(names) = self.lock().channels.clone() {
            return Ok(names);
        }
        self.refresh_channels()
    }

    /// Re-read the channel list from the device.
    pub fn refresh_channels(&self) -> Result<Vec<String>> {
        let reply = self.channel.send(self.device, "tel list", true)?;
        if reply.starts_with("ERR") {
            return Err(ControlError::protocol("tel list rejected", reply.as_bytes()));
        }
        let names: Vec<String> = reply
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && *l != "OK")
            .map(str::to_string)
            .collect();
        debug!(device = %self.device, count = names.len(), "telemetry channels listed");
        self.lock().channels = Some(names.clone());
        Ok(names)
    }

    pub fn schema(&self, name: &str) -> Result<TelemetrySchema> {
        if let Some(schema) = self.lock().schemas.get(name) {
            return Ok(schema.clone());
        }
        if !self.channels()?.iter().any(|n| n == name)
            && !self.refresh_channels()?.iter().any(|n| n == name)
        {
            return Err(ControlError::UnknownChannel(name.to_string()));
        }
        let reply = self
            .channel
            .send(self.device, &format!("tel schema {name}"), true)?;
        if reply.starts_with("ERR") {
            return Err(ControlError::protocol(
                format!("schema for {name} rejected"),
                reply.as_bytes(),
            ));
        }
        let schema = TelemetrySchema::parse(&reply)?;
        self.lock()
            .schemas
            .insert(name.to_string(), schema.clone());
        Ok(schema)
    }

    /// Forget every cached channel list and schema.
    pub fn invalidate(&self) {
        let mut cache = self.lock();
        cache.channels = None;
        cache.schemas.clear();
    }

    /// Read one record of channel `name`.
    ///
    /// A version mismatch between the reply and the cached schema drops the cache and
    /// retries once with the fresh schema.
    pub fn read_data(&self, name: &str) -> Result<TelemetryRecord> {
        let schema = self.schema(name)?;
        let stale = match self.fetch(name, &schema)? {
            Fetched::Record(record) => return Ok(record),
            Fetched::Stale(version) => version,
        };
        info!(
            channel = name,
            cached = schema.version,
            reported = stale,
            "telemetry schema changed; refreshing"
        );
        self.invalidate();
        let schema = self.schema(name)?;
        match self.fetch(name, &schema)? {
            Fetched::Record(record) => Ok(record),
            Fetched::Stale(version) => Err(ControlError::Protocol {
                message: format!(
                    "channel {name} reports version {version}, schema says {}",
                    schema.version
                ),
                raw: Vec::new(),
            }),
        }
    }

    /// Lazily re-read `name` every `period`; the first read happens immediately.
    pub fn poll(&self, name: &str, period: Duration) -> Poll<'_> {
        Poll {
            reader: self,
            name: name.to_string(),
            cadence: Cadence::new(period),
        }
    }

    fn fetch(&self, name: &str, schema: &TelemetrySchema) -> Result<Fetched> {
        let request = format!("tel get {name}\n");
        let raw = self.channel.exchange(self.device, request.as_bytes(), None)?;
        if raw.starts_with(b"ERR") {
            return Err(ControlError::protocol(format!("tel get {name} rejected"), &raw));
        }
        let (version, fields) = match schema.format {
            ChannelFormat::Text => decode_text(schema, &raw)?,
            ChannelFormat::Binary => decode_binary(schema, &raw)?,
        };
        if version != schema.version {
            return Ok(Fetched::Stale(version));
        }
        Ok(Fetched::Record(TelemetryRecord {
            channel: name.to_string(),
            version,
            ts: OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .ok(),
            fields,
        }))
    }
}

type Fields = BTreeMap<String, TelemetryValue>;

fn decode_text(schema: &TelemetrySchema, raw: &[u8]) -> Result<(u32, Fields)> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| ControlError::protocol("non-text reply on text channel", raw))?;
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let version = lines
        .next()
        .and_then(|l| l.strip_prefix("version "))
        .and_then(|v| v.trim().parse::<u32>().ok())
        .ok_or_else(|| ControlError::protocol("telemetry reply without version", raw))?;
    if version != schema.version {
        return Ok((version, Fields::new()));
    }
    let mut seen = HashSet::new();
    let mut fields = Fields::new();
    for line in lines {
        if line == "OK" {
            continue;
        }
        let (name, value) = line
            .split_once(char::is_whitespace)
            .ok_or_else(|| ControlError::protocol(format!("bad telemetry line: {line}"), raw))?;
        let res = schema
            .resolution(name)
            .ok_or_else(|| ControlError::protocol(format!("field {name} not in schema"), raw))?;
        if !seen.insert(name) {
            return Err(ControlError::protocol(format!("field {name} repeated"), raw));
        }
        if res == Resolution::Ignore {
            continue;
        }
        let value = TelemetryValue::parse(value.trim(), res).ok_or_else(|| {
            ControlError::protocol(format!("field {name} is not a valid {res} value"), raw)
        })?;
        fields.insert(name.to_string(), value);
    }
    let missing: Vec<&str> = schema
        .fields
        .iter()
        .filter(|(name, res)| *res != Resolution::Ignore && !seen.contains(name.as_str()))
        .map(|(name, _)| name.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(ControlError::protocol(
            format!("fields missing from telemetry reply: {}", missing.join(", ")),
            raw,
        ));
    }
    Ok((version, fields))
}

fn decode_binary(schema: &TelemetrySchema, raw: &[u8]) -> Result<(u32, Fields)> {
    let [a, b, c, d, rest @ ..] = raw else {
        return Err(ControlError::protocol("telemetry reply without version", raw));
    };
    let version = u32::from_le_bytes([*a, *b, *c, *d]);
    if version != schema.version {
        return Ok((version, Fields::new()));
    }
    let mut offset = 0;
    let mut fields = Fields::new();
    for (name, res) in &schema.fields {
        if *res == Resolution::Ignore {
            continue;
        }
        let value = match decode_with(&rest[offset..], *res, 1.0)? {
            None => TelemetryValue::Absent,
            Some(v) if *res == Resolution::Float32 => TelemetryValue::F64(v),
            Some(v) => TelemetryValue::I64(v as i64),
        };
        offset += res.width();
        fields.insert(name.clone(), value);
    }
    if offset != rest.len() {
        return Err(ControlError::protocol(
            format!("{} trailing bytes in telemetry reply", rest.len() - offset),
            raw,
        ));
    }
    Ok((version, fields))
}

/// Endless sequence of reads of one channel, paced by a [`Cadence`].
pub struct Poll<'a> {
    reader: &'a TelemetryReader,
    name: String,
    cadence: Cadence,
}

impl Poll<'_> {
    /// Start the sequence over; the next read happens immediately.
    pub fn restart(&mut self) {
        self.cadence.reset();
    }

    pub fn missed(&self) -> u64 {
        self.cadence.missed()
    }
}

impl Iterator for Poll<'_> {
    type Item = Result<TelemetryRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.cadence.wait();
        Some(self.reader.read_data(&self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelOptions;
    use crate::sim::SimulatedServo;
    use servo_transport::MockHandle;

    fn reader() -> (TelemetryReader, SimulatedServo, MockHandle) {
        let servo = SimulatedServo::new(DeviceId::new(1).unwrap());
        let transport = servo.transport();
        let handle = transport.handle();
        let channel = Arc::new(DiagnosticChannel::new(transport, ChannelOptions::default()));
        (TelemetryReader::new(channel, servo.id()), servo, handle)
    }

    #[test]
    fn schema_round_trips_text() {
        let schema = TelemetrySchema::new(2, ChannelFormat::Binary)
            .with_field("position", Resolution::Float32)
            .with_field("fault", Resolution::Int8);
        assert_eq!(TelemetrySchema::parse(&schema.to_text()).unwrap(), schema);
        assert!(TelemetrySchema::parse("field x f32\n").is_err());
    }

    #[test]
    fn lists_and_caches_channels() {
        let (reader, _servo, handle) = reader();
        let names = reader.channels().unwrap();
        assert!(names.contains(&"servo_stats".to_string()));
        let sent = handle.sent().len();
        reader.channels().unwrap();
        assert_eq!(handle.sent().len(), sent);
    }

    #[test]
    fn reads_binary_channel() {
        let (reader, servo, _handle) = reader();
        servo.set_field("servo_stats", "voltage", 24.5);
        let record = reader.read_data("servo_stats").unwrap();
        assert_eq!(record.channel, "servo_stats");
        assert_eq!(record.get("mode"), Some(&TelemetryValue::I64(0)));
        assert_eq!(record.get_f64("voltage"), Some(24.5));
        assert!(record.ts.is_some());
    }

    #[test]
    fn reads_text_channel() {
        let (reader, _servo, _handle) = reader();
        let record = reader.read_data("system_info").unwrap();
        assert_eq!(record.get("uptime_s"), Some(&TelemetryValue::I64(12)));
        assert_eq!(record.get_f64("board_temp"), Some(31.5));
    }

    #[test]
    fn unknown_channel_after_relist() {
        let (reader, _servo, _handle) = reader();
        reader.channels().unwrap();
        let err = reader.read_data("nope").unwrap_err();
        assert!(matches!(err, ControlError::UnknownChannel(ref n) if n == "nope"));
    }

    #[test]
    fn channel_added_later_is_found_by_relisting() {
        let (reader, servo, _handle) = reader();
        reader.channels().unwrap();
        servo.add_channel(
            "late",
            TelemetrySchema::new(1, ChannelFormat::Text).with_field("count", Resolution::Int32),
        );
        servo.set_field("late", "count", 7.0);
        let record = reader.read_data("late").unwrap();
        assert_eq!(record.get("count"), Some(&TelemetryValue::I64(7)));
    }

    #[test]
    fn version_change_refreshes_schema() {
        let (reader, servo, _handle) = reader();
        let first = reader.read_data("servo_stats").unwrap();
        servo.bump_schema("servo_stats");
        let second = reader.read_data("servo_stats").unwrap();
        assert_eq!(second.version, first.version + 1);
        assert_eq!(reader.schema("servo_stats").unwrap().version, second.version);
    }

    #[test]
    fn poll_yields_fresh_records() {
        let (reader, servo, _handle) = reader();
        let mut poll = reader.poll("servo_stats", Duration::from_millis(5));
        let first = poll.next().unwrap().unwrap();
        servo.set_field("servo_stats", "voltage", 12.0);
        let second = poll.next().unwrap().unwrap();
        assert_ne!(first.get_f64("voltage"), second.get_f64("voltage"));
        poll.restart();
        assert!(poll.next().unwrap().is_ok());
    }

    #[test]
    fn record_serializes_as_json() {
        let (reader, _servo, _handle) = reader();
        let record = reader.read_data("system_info").unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["channel"], "system_info");
        assert_eq!(json["fields"]["uptime_s"], 12);
    }

    fn text_schema() -> TelemetrySchema {
        TelemetrySchema::new(1, ChannelFormat::Text)
            .with_field("uptime_s", Resolution::Int32)
            .with_field("board_temp", Resolution::Float32)
            .with_field("spare", Resolution::Ignore)
    }

    #[test]
    fn text_reply_follows_declared_resolutions() {
        let (version, fields) =
            decode_text(&text_schema(), b"version 1\nuptime_s 40\nboard_temp nan\nOK\n").unwrap();
        assert_eq!(version, 1);
        assert_eq!(fields.get("uptime_s"), Some(&TelemetryValue::I64(40)));
        assert_eq!(fields.get("board_temp"), Some(&TelemetryValue::Absent));
        assert!(!fields.contains_key("spare"));

        let err = decode_text(&text_schema(), b"version 1\nuptime_s 4.5\nboard_temp 30\n").unwrap_err();
        assert!(matches!(err, ControlError::Protocol { .. }));
    }

    #[test]
    fn text_reply_with_undeclared_field_is_rejected() {
        let err = decode_text(
            &text_schema(),
            b"version 1\nuptime_s 40\nboard_temp 30.5\nrogue 1\n",
        )
        .unwrap_err();
        match err {
            ControlError::Protocol { message, .. } => assert!(message.contains("rogue")),
            other => panic!("unexpected {other:?}"),
        }
        let err = decode_text(
            &text_schema(),
            b"version 1\nuptime_s 40\nuptime_s 41\nboard_temp 30.5\n",
        )
        .unwrap_err();
        assert!(matches!(err, ControlError::Protocol { .. }));
    }

    #[test]
    fn text_reply_missing_declared_field_is_rejected() {
        let err = decode_text(&text_schema(), b"version 1\nuptime_s 40\n").unwrap_err();
        match err {
            ControlError::Protocol { message, .. } => {
                assert!(message.contains("board_temp"));
                assert!(!message.contains("spare"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn text_reply_with_new_version_is_left_to_refresh() {
        let (version, fields) = decode_text(&text_schema(), b"version 2\nother 1\n").unwrap();
        assert_eq!(version, 2);
        assert!(fields.is_empty());
    }

    #[test]
    fn values_survive_json_round_trip() {
        let (reader, _servo, _handle) = reader();
        let record = reader.read_data("servo_stats").unwrap();
        let json = serde_json::to_string(&record).unwrap();
        let back: TelemetryRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.fields, record.fields);
        assert_eq!(back.get("mode"), Some(&TelemetryValue::I64(0)));

        let values = vec![
            TelemetryValue::I64(-3),
            TelemetryValue::F64(2.5),
            TelemetryValue::Absent,
        ];
        let back: Vec<TelemetryValue> =
            serde_json::from_str(&serde_json::to_string(&values).unwrap()).unwrap();
        assert_eq!(back, values);
    }
}
