//! Decoding of the `S|XXXX|YYYY|ZZZZZ|AB` command that configures one sweep.
//!
//! The firmware stores the result in a fixed-layout record which the caller
//! owns. [`make_run_params`] fills that record in place and only touches it
//! once every field of the command has been decoded.
//!
//! Square-wave runs use `S|XXXX|YYYY|IIII|HHHHH|ZZZZZAB`: the increment and
//! pulse height sit before the timer, and the flags follow the timer with no
//! delimiter so they land on the firmware's fixed offsets 28 and 29.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Delimiter between command fields.
const DELIMITER: char = '|';
/// Command tag of the "make look up table" command.
const COMMAND_TAG: &str = "S";
/// Token count of a plain sweep command.
const SWEEP_TOKENS: usize = 5;
/// Token count of a square-wave voltammetry sweep command.
const SWV_TOKENS: usize = 6;

/// Sweep shape, stored by the firmware as its ASCII tag.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SweepType {
    /// `C`: cyclic voltammetry, sweeps to the end value and back.
    #[default]
    Cyclic = b'C',
    /// `L`: linear sweep from start to end value.
    Linear = b'L',
}

impl SweepType {
    fn from_tag(tag: char) -> Option<Self> {
        match tag {
            'C' => Some(Self::Cyclic),
            'L' => Some(Self::Linear),
            _ => None,
        }
    }

    pub fn tag(self) -> char {
        char::from(self as u8)
    }
}

/// Where the waveform starts, stored by the firmware as its ASCII tag.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum StartVoltType {
    /// `S`: start at the start value (triangle shaped sweep).
    #[default]
    StartValue = b'S',
    /// `Z`: start at zero volts.
    Zero = b'Z',
}

impl StartVoltType {
    fn from_tag(tag: char) -> Option<Self> {
        match tag {
            'S' => Some(Self::StartValue),
            'Z' => Some(Self::Zero),
            _ => None,
        }
    }

    pub fn tag(self) -> char {
        char::from(self as u8)
    }
}

/// Parameters for one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunParams {
    pub start_value: u16,
    pub end_value: u16,
    pub sweep_type: SweepType,
    pub start_volt_type: StartVoltType,
    pub use_swv: bool,
    pub swv_inc: u16,
    pub swv_pulse_height: u16,
    /// PWM period, the sample rate is 240 kHz / `timer_period`.
    pub timer_period: u16,
}

/// Numeric fields of the command, each with a fixed digit count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    StartValue,
    EndValue,
    SwvIncrement,
    SwvPulseHeight,
    TimerPeriod,
}

impl Field {
    /// Number of digits the firmware reads for this field.
    pub fn width(self) -> usize {
        match self {
            Field::StartValue | Field::EndValue | Field::SwvIncrement => 4,
            Field::SwvPulseHeight | Field::TimerPeriod => 5,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::StartValue => "start value",
            Field::EndValue => "end value",
            Field::SwvIncrement => "square wave increment",
            Field::SwvPulseHeight => "square wave pulse height",
            Field::TimerPeriod => "timer period",
        };
        f.write_str(name)
    }
}

/// Reasons a run parameter command is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("expected 5 or 6 '|' separated fields, found {0}")]
    FieldCount(usize),
    #[error("expected command tag 'S', found {0:?}")]
    UnexpectedCommand(String),
    #[error("{field} must be {expected} digits, found {found}")]
    FieldWidth {
        field: Field,
        expected: usize,
        found: usize,
    },
    #[error("{field} is not a decimal number: {token:?}")]
    NotNumeric { field: Field, token: String },
    #[error("{field} {value} does not fit in 16 bits")]
    Overflow { field: Field, value: u32 },
    #[error("flag block must be two characters, found {0:?}")]
    InvalidFlags(String),
    #[error("unknown sweep type {0:?}, expected 'C' or 'L'")]
    UnknownSweepType(char),
    #[error("unknown start voltage type {0:?}, expected 'S' or 'Z'")]
    UnknownStartVoltType(char),
}

/// Reasons a record cannot be rendered as a command.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("{field} {value} needs more than {} digits", .field.width())]
    FieldTooWide { field: Field, value: u16 },
    #[error("square wave increment {inc} and pulse height {height} set while square wave is off")]
    SwvFieldsWithoutSwv { inc: u16, height: u16 },
}

/// Decodes `command` into the caller's `params` and returns it.
///
/// On error `params` is left exactly as it was.
pub fn make_run_params<'a>(
    command: &str,
    params: &'a mut RunParams,
) -> Result<&'a mut RunParams, DecodeError> {
    let command = command.trim_end_matches(['\0', '\r', '\n']);
    let tokens: Vec<&str> = command.split(DELIMITER).collect();

    if tokens.len() != SWEEP_TOKENS && tokens.len() != SWV_TOKENS {
        return Err(DecodeError::FieldCount(tokens.len()));
    }
    if tokens[0] != COMMAND_TAG {
        return Err(DecodeError::UnexpectedCommand(tokens[0].to_owned()));
    }

    let start_value = decode_field(tokens[1], Field::StartValue)?;
    let end_value = decode_field(tokens[2], Field::EndValue)?;

    // Square wave runs carry the increment and pulse height before the timer.
    let use_swv = tokens.len() == SWV_TOKENS;
    let (swv_inc, swv_pulse_height, timer_token, flags) = if use_swv {
        let (timer, flags) = split_timer_and_flags(tokens[5]);
        (
            decode_field(tokens[3], Field::SwvIncrement)?,
            decode_field(tokens[4], Field::SwvPulseHeight)?,
            timer,
            flags,
        )
    } else {
        (0, 0, tokens[3], tokens[4])
    };
    let timer_period = decode_field(timer_token, Field::TimerPeriod)?;
    let (sweep_type, start_volt_type) = decode_flags(flags)?;

    *params = RunParams {
        start_value,
        end_value,
        sweep_type,
        start_volt_type,
        use_swv,
        swv_inc,
        swv_pulse_height,
        timer_period,
    };
    tracing::debug!(?params, "decoded run parameters");
    Ok(params)
}

fn decode_field(token: &str, field: Field) -> Result<u16, DecodeError> {
    let expected = field.width();
    if !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DecodeError::NotNumeric {
            field,
            token: token.to_owned(),
        });
    }
    if token.len() != expected {
        return Err(DecodeError::FieldWidth {
            field,
            expected,
            found: token.len(),
        });
    }

    let value = token
        .bytes()
        .fold(0u32, |acc, b| acc * 10 + u32::from(b - b'0'));
    u16::try_from(value).map_err(|_| DecodeError::Overflow { field, value })
}

// `ZZZZZAB` with the flags glued to the timer digits.
fn split_timer_and_flags(token: &str) -> (&str, &str) {
    let width = Field::TimerPeriod.width();
    match (token.get(..width), token.get(width..)) {
        (Some(timer), Some(flags)) => (timer, flags),
        _ => (token, ""),
    }
}

fn decode_flags(flags: &str) -> Result<(SweepType, StartVoltType), DecodeError> {
    let mut chars = flags.chars();
    let (Some(sweep), Some(start), None) = (chars.next(), chars.next(), chars.next()) else {
        return Err(DecodeError::InvalidFlags(flags.to_owned()));
    };

    let sweep_type = SweepType::from_tag(sweep).ok_or(DecodeError::UnknownSweepType(sweep))?;
    let start_volt_type =
        StartVoltType::from_tag(start).ok_or(DecodeError::UnknownStartVoltType(start))?;
    Ok((sweep_type, start_volt_type))
}

impl RunParams {
    /// Renders the command that decodes back into these parameters.
    ///
    /// A record with square wave off must have zeroed square wave fields,
    /// otherwise those values would be lost in the command.
    pub fn encode(&self) -> Result<String, EncodeError> {
        if !self.use_swv && (self.swv_inc != 0 || self.swv_pulse_height != 0) {
            return Err(EncodeError::SwvFieldsWithoutSwv {
                inc: self.swv_inc,
                height: self.swv_pulse_height,
            });
        }

        let mut command = String::from(COMMAND_TAG);
        let mut push = |field: Field, value: u16| {
            let digits = format!("{:0width$}", value, width = field.width());
            if digits.len() > field.width() {
                return Err(EncodeError::FieldTooWide { field, value });
            }
            command.push(DELIMITER);
            command.push_str(&digits);
            Ok(())
        };

        push(Field::StartValue, self.start_value)?;
        push(Field::EndValue, self.end_value)?;
        if self.use_swv {
            push(Field::SwvIncrement, self.swv_inc)?;
            push(Field::SwvPulseHeight, self.swv_pulse_height)?;
        }
        push(Field::TimerPeriod, self.timer_period)?;

        if !self.use_swv {
            command.push(DELIMITER);
        }
        command.push(self.sweep_type.tag());
        command.push(self.start_volt_type.tag());
        Ok(command)
    }
}

impl FromStr for RunParams {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut params = RunParams::default();
        make_run_params(s, &mut params)?;
        Ok(params)
    }
}

impl fmt::Display for RunParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sweep = match self.sweep_type {
            SweepType::Cyclic => "cyclic",
            SweepType::Linear => "linear",
        };
        let start = match self.start_volt_type {
            StartVoltType::StartValue => "from start value",
            StartVoltType::Zero => "from zero",
        };
        write!(
            f,
            "{sweep} sweep {} -> {} {start}, period {}",
            self.start_value, self.end_value, self.timer_period
        )?;
        if self.use_swv {
            write!(
                f,
                ", square wave inc {} height {}",
                self.swv_inc, self.swv_pulse_height
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_cyclic_sweep_command() {
        let mut params = RunParams::default();
        let decoded = make_run_params("S|0105|0095|38399|CS", &mut params).unwrap();
        assert_eq!(decoded.start_value, 105);
        assert_eq!(decoded.end_value, 95);
        assert_eq!(decoded.timer_period, 38399);
        assert_eq!(decoded.sweep_type, SweepType::Cyclic);
        assert_eq!(decoded.start_volt_type, StartVoltType::StartValue);
        assert!(!decoded.use_swv);
        assert_eq!(decoded.swv_inc, 0);
        assert_eq!(decoded.swv_pulse_height, 0);
    }

    #[test]
    fn fills_the_callers_record() {
        let mut params = RunParams::default();
        make_run_params("S|1200|0300|00100|LZ", &mut params).unwrap();
        assert_eq!(
            params,
            RunParams {
                start_value: 1200,
                end_value: 300,
                sweep_type: SweepType::Linear,
                start_volt_type: StartVoltType::Zero,
                use_swv: false,
                swv_inc: 0,
                swv_pulse_height: 0,
                timer_period: 100,
            }
        );
    }

    #[test]
    fn tags_match_firmware_bytes() {
        assert_eq!(SweepType::Cyclic as u8, b'C');
        assert_eq!(SweepType::Linear as u8, b'L');
        assert_eq!(StartVoltType::StartValue as u8, b'S');
        assert_eq!(StartVoltType::Zero as u8, b'Z');
    }

    #[test]
    fn decodes_square_wave_command() {
        let params: RunParams = "S|0500|1500|0010|00050|02400LS".parse().unwrap();
        assert!(params.use_swv);
        assert_eq!(params.swv_inc, 10);
        assert_eq!(params.swv_pulse_height, 50);
        assert_eq!(params.timer_period, 2400);
        assert_eq!(params.start_value, 500);
        assert_eq!(params.end_value, 1500);
        assert_eq!(params.sweep_type, SweepType::Linear);
        assert_eq!(params.start_volt_type, StartVoltType::StartValue);
    }

    #[test]
    fn square_wave_flags_sit_at_firmware_offsets() {
        let command = "S|0500|1500|0010|00050|02400LZ";
        assert_eq!(command.as_bytes()[28], SweepType::Linear as u8);
        assert_eq!(command.as_bytes()[29], StartVoltType::Zero as u8);

        let params: RunParams = command.parse().unwrap();
        assert_eq!(params.sweep_type, SweepType::Linear);
        assert_eq!(params.start_volt_type, StartVoltType::Zero);

        let encoded = params.encode().unwrap();
        assert_eq!(encoded, command);
        assert_eq!(&encoded[12..16], "0010");
        assert_eq!(&encoded[17..22], "00050");
        assert_eq!(&encoded[23..28], "02400");
    }

    #[test]
    fn reject_delimited_square_wave_flags() {
        assert_eq!(
            "S|0500|1500|0010|00050|02400|LS".parse::<RunParams>().unwrap_err(),
            DecodeError::FieldCount(7)
        );
        assert_eq!(
            "S|0500|1500|0010|00050|02400".parse::<RunParams>().unwrap_err(),
            DecodeError::InvalidFlags(String::new())
        );
        assert_eq!(
            "S|0500|1500|0010|00050|2400LS".parse::<RunParams>().unwrap_err(),
            DecodeError::NotNumeric {
                field: Field::TimerPeriod,
                token: String::from("2400L")
            }
        );
    }

    #[test]
    fn square_wave_fields_reset_by_plain_command() {
        let mut params: RunParams = "S|0500|1500|0010|00050|02400LS".parse().unwrap();
        make_run_params("S|0500|1500|02400|LS", &mut params).unwrap();
        assert!(!params.use_swv);
        assert_eq!(params.swv_inc, 0);
        assert_eq!(params.swv_pulse_height, 0);
    }

    #[test]
    fn tolerates_usb_buffer_padding() {
        let params: RunParams = "S|0105|0095|38399|CS\r\n\0\0\0".parse().unwrap();
        assert_eq!(params.timer_period, 38399);
    }

    #[test]
    fn boundary_values() {
        let low: RunParams = "S|0000|0000|00000|CS".parse().unwrap();
        assert_eq!((low.start_value, low.end_value, low.timer_period), (0, 0, 0));

        let high: RunParams = "S|9999|9999|65535|CS".parse().unwrap();
        assert_eq!(
            (high.start_value, high.end_value, high.timer_period),
            (9999, 9999, u16::MAX)
        );
    }

    #[test]
    fn reject_timer_overflow() {
        let err = "S|0105|0095|65536|CS".parse::<RunParams>().unwrap_err();
        assert_eq!(
            err,
            DecodeError::Overflow {
                field: Field::TimerPeriod,
                value: 65536
            }
        );
    }

    #[test]
    fn reject_wrong_field_count() {
        assert_eq!(
            "S|0105|0095|38399".parse::<RunParams>().unwrap_err(),
            DecodeError::FieldCount(4)
        );
        assert_eq!(
            "S|0105|0095|38399|CS||".parse::<RunParams>().unwrap_err(),
            DecodeError::FieldCount(7)
        );
        assert_eq!("".parse::<RunParams>().unwrap_err(), DecodeError::FieldCount(1));
    }

    #[test]
    fn reject_other_command_tag() {
        assert_eq!(
            "T|0105|0095|38399|CS".parse::<RunParams>().unwrap_err(),
            DecodeError::UnexpectedCommand(String::from("T"))
        );
    }

    #[test]
    fn reject_short_and_non_numeric_fields() {
        assert_eq!(
            "S|105|0095|38399|CS".parse::<RunParams>().unwrap_err(),
            DecodeError::FieldWidth {
                field: Field::StartValue,
                expected: 4,
                found: 3
            }
        );
        assert_eq!(
            "S|0105|00x5|38399|CS".parse::<RunParams>().unwrap_err(),
            DecodeError::NotNumeric {
                field: Field::EndValue,
                token: String::from("00x5")
            }
        );
        assert!(matches!(
            "S|0105|0095|+8399|CS".parse::<RunParams>(),
            Err(DecodeError::NotNumeric {
                field: Field::TimerPeriod,
                ..
            })
        ));
    }

    #[test]
    fn reject_bad_flags() {
        assert_eq!(
            "S|0105|0095|38399|XS".parse::<RunParams>().unwrap_err(),
            DecodeError::UnknownSweepType('X')
        );
        assert_eq!(
            "S|0105|0095|38399|CQ".parse::<RunParams>().unwrap_err(),
            DecodeError::UnknownStartVoltType('Q')
        );
        assert_eq!(
            "S|0105|0095|38399|C".parse::<RunParams>().unwrap_err(),
            DecodeError::InvalidFlags(String::from("C"))
        );
        assert_eq!(
            "S|0105|0095|38399|CSS".parse::<RunParams>().unwrap_err(),
            DecodeError::InvalidFlags(String::from("CSS"))
        );
    }

    #[test]
    fn failed_decode_leaves_record_untouched() {
        let mut params: RunParams = "S|0105|0095|38399|CS".parse().unwrap();
        let before = params;
        // Numeric fields are valid, only the flag block is bad.
        let result = make_run_params("S|2000|0001|00010|LX", &mut params);
        assert!(result.is_err());
        assert_eq!(params, before);
    }

    #[test]
    fn encode_matches_firmware_format() {
        let params: RunParams = "S|0105|0095|38399|CS".parse().unwrap();
        assert_eq!(params.encode().unwrap(), "S|0105|0095|38399|CS");

        let swv = RunParams {
            start_value: 7,
            end_value: 2047,
            sweep_type: SweepType::Linear,
            start_volt_type: StartVoltType::Zero,
            use_swv: true,
            swv_inc: 4,
            swv_pulse_height: 25,
            timer_period: 240,
        };
        assert_eq!(swv.encode().unwrap(), "S|0007|2047|0004|00025|00240LZ");
        assert_eq!(swv.encode().unwrap().parse::<RunParams>().unwrap(), swv);
    }

    #[test]
    fn encode_rejects_values_wider_than_field() {
        let params = RunParams {
            start_value: 10_000,
            ..RunParams::default()
        };
        assert_eq!(
            params.encode().unwrap_err(),
            EncodeError::FieldTooWide {
                field: Field::StartValue,
                value: 10_000
            }
        );
    }

    #[test]
    fn encode_rejects_square_wave_fields_when_off() {
        let params = RunParams {
            swv_inc: 5,
            ..RunParams::default()
        };
        assert_eq!(
            params.encode().unwrap_err(),
            EncodeError::SwvFieldsWithoutSwv { inc: 5, height: 0 }
        );

        let params = RunParams {
            swv_pulse_height: 30,
            ..RunParams::default()
        };
        assert_eq!(
            params.encode().unwrap_err(),
            EncodeError::SwvFieldsWithoutSwv { inc: 0, height: 30 }
        );

        // Zeroed square wave fields are fine with square wave on or off.
        let params = RunParams {
            use_swv: true,
            ..RunParams::default()
        };
        assert_eq!(params.encode().unwrap(), "S|0000|0000|0000|00000|00000CS");
    }

    #[test]
    fn display_summarises_run() {
        let params: RunParams = "S|0105|0095|38399|CS".parse().unwrap();
        assert_eq!(
            params.to_string(),
            "cyclic sweep 105 -> 95 from start value, period 38399"
        );
    }
}
