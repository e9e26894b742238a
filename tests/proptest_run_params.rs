//! Property tests for the run parameter command codec.

use pstat_sim::{make_run_params, DecodeError, RunParams, StartVoltType, SweepType};
use proptest::prelude::*;

fn sweep_type_strategy() -> impl Strategy<Value = SweepType> {
    prop_oneof![Just(SweepType::Cyclic), Just(SweepType::Linear)]
}

fn start_volt_type_strategy() -> impl Strategy<Value = StartVoltType> {
    prop_oneof![Just(StartVoltType::StartValue), Just(StartVoltType::Zero)]
}

// Every record the command format can carry. With square wave off the
// square wave fields are zero, as the decoder leaves them.
fn run_params_strategy() -> impl Strategy<Value = RunParams> {
    (
        0u16 ..= 9999,
        0u16 ..= 9999,
        sweep_type_strategy(),
        start_volt_type_strategy(),
        any::<bool>(),
        0u16 ..= 9999,
        any::<u16>(),
        any::<u16>(),
    )
        .prop_map(
            |(start, end, sweep_type, start_volt_type, use_swv, inc, height, timer)| RunParams {
                start_value: start,
                end_value: end,
                sweep_type,
                start_volt_type,
                use_swv,
                swv_inc: if use_swv { inc } else { 0 },
                swv_pulse_height: if use_swv { height } else { 0 },
                timer_period: timer,
            },
        )
}

proptest! {
    #[test]
    fn encoded_command_decodes_to_same_record(params in run_params_strategy()) {
        let command = params.encode().unwrap();
        let decoded: RunParams = command.parse().unwrap();
        prop_assert_eq!(decoded, params);
    }

    #[test]
    fn encoded_command_has_fixed_layout(params in run_params_strategy()) {
        let command = params.encode().unwrap();
        let bytes = command.as_bytes();
        if params.use_swv {
            prop_assert_eq!(bytes.len(), 30);
            prop_assert_eq!(bytes[28], params.sweep_type as u8);
            prop_assert_eq!(bytes[29], params.start_volt_type as u8);
        } else {
            prop_assert_eq!(bytes.len(), 20);
            prop_assert_eq!(bytes[18], params.sweep_type as u8);
            prop_assert_eq!(bytes[19], params.start_volt_type as u8);
        }
    }

    #[test]
    fn decode_overwrites_any_previous_record(
        previous in run_params_strategy(),
        params in run_params_strategy(),
    ) {
        let mut record = previous;
        let command = params.encode().unwrap();
        make_run_params(&command, &mut record).unwrap();
        prop_assert_eq!(record, params);
    }

    #[test]
    fn timer_above_16_bits_is_rejected(timer in 65_536u32 ..= 99_999) {
        let mut record = RunParams::default();
        let command = format!("S|0105|0095|{timer:05}|CS");
        let result = make_run_params(&command, &mut record);
        prop_assert!(matches!(result, Err(DecodeError::Overflow { value, .. }) if value == timer), "expected Overflow error carrying the timer value");
        prop_assert_eq!(record, RunParams::default());
    }

    #[test]
    fn arbitrary_input_never_panics(command in ".{0,40}") {
        let mut record = RunParams::default();
        let _ = make_run_params(&command, &mut record);
    }
}
