//! Logical points: typed projections of flat parameter keys.
//!
//! A point is created once, either statically from a device
//! [catalog](crate::catalog) or dynamically by battery-module
//! [discovery](crate::discovery), and refreshed in place from the current
//! [`ParameterMap`]. Writable points also know how to build the vendor
//! set-command for a new value.

mod transform;
mod value;

pub use transform::{MAX_REMAINING, Reading, ValueTransform};
pub use value::PointValue;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::discovery::{self, PRIMARY_FIELD};
use crate::error::CommandError;
use crate::params::ParameterMap;
use crate::payload::RawMessage;

/// Unit of measurement attached to a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "%")]
    Percent,
    #[serde(rename = "W")]
    Watt,
    #[serde(rename = "V")]
    Volt,
    #[serde(rename = "mA")]
    MilliAmpere,
    #[serde(rename = "A")]
    Ampere,
    #[serde(rename = "°C")]
    Celsius,
    #[serde(rename = "Wh")]
    WattHour,
    #[serde(rename = "Hz")]
    Hertz,
    #[serde(rename = "min")]
    Minutes,
    #[serde(rename = "s")]
    Seconds,
    #[serde(rename = "cycles")]
    Cycles,
}

impl Unit {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Percent => "%",
            Self::Watt => "W",
            Self::Volt => "V",
            Self::MilliAmpere => "mA",
            Self::Ampere => "A",
            Self::Celsius => "°C",
            Self::WattHour => "Wh",
            Self::Hertz => "Hz",
            Self::Minutes => "min",
            Self::Seconds => "s",
            Self::Cycles => "cycles",
        }
    }
}

/// Semantic class of a point's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Battery,
    Power,
    Voltage,
    Current,
    Temperature,
    Energy,
    Duration,
    Frequency,
}

/// How a value evolves over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    Measurement,
    TotalIncreasing,
}

/// One choice of a select point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectOption {
    pub label: &'static str,
    pub value: i64,
}

/// What kind of point this is, with its kind-specific constraints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointKind {
    Sensor(ValueTransform),
    /// Inclusive numeric range.
    Number { min: f64, max: f64 },
    Switch,
    Select(&'static [SelectOption]),
}

/// Template of the vendor's TCP set-command:
/// `{"moduleType":0,"operateType":"TCP","params":{"id":<id>,"<field>":<value>}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTemplate {
    pub id: u32,
    pub field: &'static str,
}

impl CommandTemplate {
    #[must_use]
    pub fn build(&self, value: Value) -> RawMessage {
        let mut params = serde_json::Map::new();
        params.insert("id".to_string(), json!(self.id));
        params.insert(self.field.to_string(), value);

        let mut message = RawMessage::new();
        message.insert("moduleType".to_string(), json!(0));
        message.insert("operateType".to_string(), json!("TCP"));
        message.insert("params".to_string(), Value::Object(params));
        message
    }
}

/// A validated set-command ready to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct SetCommand {
    /// Wire message for the device's set topic.
    pub message: RawMessage,
    /// Optimistic local patch, keyed by flat key.
    pub target: RawMessage,
}

/// Static description of a catalog point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointSpec {
    pub key: &'static str,
    pub name: &'static str,
    pub kind: PointKind,
    pub unit: Option<Unit>,
    pub device_class: Option<DeviceClass>,
    pub state_class: Option<StateClass>,
    pub diagnostic: bool,
    pub command: Option<CommandTemplate>,
}

impl PointSpec {
    const fn new(key: &'static str, name: &'static str, kind: PointKind) -> Self {
        Self {
            key,
            name,
            kind,
            unit: None,
            device_class: None,
            state_class: None,
            diagnostic: false,
            command: None,
        }
    }

    /// Read-only sensor.
    #[must_use]
    pub const fn sensor(key: &'static str, name: &'static str, transform: ValueTransform) -> Self {
        Self::new(key, name, PointKind::Sensor(transform))
    }

    /// Writable number in `min..=max`.
    #[must_use]
    pub const fn number(
        key: &'static str,
        name: &'static str,
        min: f64,
        max: f64,
        command: CommandTemplate,
    ) -> Self {
        Self::new(key, name, PointKind::Number { min, max }).command(command)
    }

    /// Writable on/off switch.
    #[must_use]
    pub const fn switch(key: &'static str, name: &'static str, command: CommandTemplate) -> Self {
        Self::new(key, name, PointKind::Switch).command(command)
    }

    /// Writable select over fixed options.
    #[must_use]
    pub const fn select(
        key: &'static str,
        name: &'static str,
        options: &'static [SelectOption],
        command: CommandTemplate,
    ) -> Self {
        Self::new(key, name, PointKind::Select(options)).command(command)
    }

    #[must_use]
    pub const fn unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    #[must_use]
    pub const fn class(mut self, device_class: DeviceClass, state_class: StateClass) -> Self {
        self.device_class = Some(device_class);
        self.state_class = Some(state_class);
        self
    }

    #[must_use]
    pub const fn diagnostic(mut self) -> Self {
        self.diagnostic = true;
        self
    }

    const fn command(mut self, command: CommandTemplate) -> Self {
        self.command = Some(command);
        self
    }

    /// Whether a set-command can be built for this point.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.command.is_some()
    }

    /// Re-derive the displayed value from the current parameters.
    ///
    /// Missing or unusable raw values read as [`PointValue::Unknown`].
    #[must_use]
    pub fn refresh(&self, params: &ParameterMap) -> Reading {
        let raw = params.get(self.key);
        match self.kind {
            PointKind::Sensor(transform) => transform.apply(raw),
            PointKind::Number { .. } => Reading::Value(
                raw.and_then(Value::as_f64)
                    .map_or(PointValue::Unknown, PointValue::number),
            ),
            PointKind::Switch => Reading::Value(match raw {
                Some(Value::Bool(on)) => PointValue::Bool(*on),
                Some(Value::Number(n)) => n
                    .as_f64()
                    .map_or(PointValue::Unknown, |n| PointValue::Bool(n != 0.0)),
                _ => PointValue::Unknown,
            }),
            PointKind::Select(options) => Reading::Value(
                raw.and_then(Value::as_i64)
                    .and_then(|current| options.iter().find(|o| o.value == current))
                    .map_or(PointValue::Unknown, |o| PointValue::Text(o.label.to_string())),
            ),
        }
    }

    /// Validate `value` and build the set-command plus its optimistic patch.
    ///
    /// Numbers take a JSON number within range, switches a boolean or
    /// `0`/`1`, selects an option label or option value.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the point is read-only or the value does
    /// not fit the point.
    pub fn build_command(&self, value: &Value) -> Result<SetCommand, CommandError> {
        let command = self
            .command
            .ok_or_else(|| CommandError::ReadOnly(self.key.to_string()))?;

        let wire = match self.kind {
            PointKind::Sensor(_) => return Err(CommandError::ReadOnly(self.key.to_string())),
            PointKind::Number { min, max } => {
                let number = value
                    .as_f64()
                    .ok_or(CommandError::WrongType { expected: "number" })?;
                if !(min..=max).contains(&number) {
                    return Err(CommandError::OutOfRange {
                        value: number,
                        min,
                        max,
                    });
                }
                value.clone()
            }
            PointKind::Switch => json!(switch_state(value)?),
            PointKind::Select(options) => json!(select_option(options, value)?.value),
        };

        let mut target = RawMessage::new();
        target.insert(self.key.to_string(), wire.clone());
        Ok(SetCommand {
            message: command.build(wire),
            target,
        })
    }
}

fn switch_state(value: &Value) -> Result<i64, CommandError> {
    match value {
        Value::Bool(on) => Ok(i64::from(*on)),
        Value::Number(n) => match n.as_i64() {
            Some(state @ (0 | 1)) => Ok(state),
            _ => Err(CommandError::WrongType { expected: "boolean" }),
        },
        _ => Err(CommandError::WrongType { expected: "boolean" }),
    }
}

fn select_option(options: &[SelectOption], value: &Value) -> Result<SelectOption, CommandError> {
    let found = match value {
        Value::String(label) => options.iter().find(|o| o.label == label.as_str()),
        Value::Number(n) => n
            .as_i64()
            .and_then(|v| options.iter().find(|o| o.value == v)),
        _ => return Err(CommandError::WrongType { expected: "option" }),
    };
    found
        .copied()
        .ok_or_else(|| CommandError::UnknownOption(value_text(value)))
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Dynamically discovered battery module (`bp_addr.<serial>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatteryPoint {
    prefix: String,
}

/// Current reading of a [`BatteryPoint`].
#[derive(Debug, Clone, PartialEq)]
pub struct BatteryReading {
    /// State of charge in %, or unknown.
    pub value: PointValue,
    pub attributes: BTreeMap<&'static str, Value>,
}

impl BatteryPoint {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Flat-key prefix, e.g. `bp_addr.HJ32`.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Flat key of the primary value.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}.{PRIMARY_FIELD}", self.prefix)
    }

    #[must_use]
    pub fn serial(&self) -> &str {
        discovery::module_serial(&self.prefix)
    }

    #[must_use]
    pub fn name(&self) -> String {
        format!("Battery {}", self.serial())
    }

    #[must_use]
    pub fn unit(&self) -> Unit {
        Unit::Percent
    }

    #[must_use]
    pub fn device_class(&self) -> DeviceClass {
        DeviceClass::Battery
    }

    #[must_use]
    pub fn refresh(&self, params: &ParameterMap) -> BatteryReading {
        let snapshot = discovery::read_module(&self.prefix, params);
        BatteryReading {
            value: snapshot.soc.map_or(PointValue::Unknown, PointValue::number),
            attributes: snapshot.attributes,
        }
    }
}

/// Unit of a battery-module attribute field.
#[must_use]
pub fn battery_attribute_unit(field: &str) -> Option<Unit> {
    match field {
        "bpSoc" | "bpSoh" => Some(Unit::Percent),
        "bpCycles" => Some(Unit::Cycles),
        "bpAccuChgEnergy" | "bpAccuDsgEnergy" => Some(Unit::WattHour),
        "bpTemp" => Some(Unit::Celsius),
        "bpVol" => Some(Unit::Volt),
        "bpAmp" => Some(Unit::Ampere),
        "bpPwr" => Some(Unit::Watt),
        _ => None,
    }
}
