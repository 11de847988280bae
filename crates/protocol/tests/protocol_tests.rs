//! Integration tests for the watchdog wire protocol
//!
//! Checks the frame padding law, echo comparison and timer normalization
//! across their whole input ranges.

use protocol::{
    DeviceIdentity, FRAME_SIZE, Frame, ProtocolError, TimerIssue, TimerValue, parse_usb_id,
};
use proptest::prelude::*;

mod frame_laws {
    use super::*;

    proptest! {
        #[test]
        fn pad_always_yields_full_frame(payload in proptest::collection::vec(any::<u8>(), 0..=FRAME_SIZE)) {
            let frame = Frame::pad(&payload).unwrap();
            prop_assert_eq!(frame.as_bytes().len(), FRAME_SIZE);
            prop_assert_eq!(&frame.as_bytes()[..payload.len()], payload.as_slice());
            prop_assert!(frame.as_bytes()[payload.len()..].iter().all(|b| *b == 0));
        }

        #[test]
        fn pad_rejects_anything_longer(extra in 1usize..64) {
            let payload = vec![0u8; FRAME_SIZE + extra];
            prop_assert_eq!(
                Frame::pad(&payload),
                Err(ProtocolError::FrameTooLarge { size: FRAME_SIZE + extra, max: FRAME_SIZE })
            );
        }

        #[test]
        fn echo_matches_only_identical_response(command in any::<u8>(), index in 0usize..FRAME_SIZE, flip in 1u8..=255) {
            let frame = Frame::command(command);
            let mut response = *frame.as_bytes();
            prop_assert!(frame.matches(&response));

            response[index] ^= flip;
            prop_assert!(!frame.matches(&response));
        }
    }

    #[test]
    fn test_scenario_a_frames() {
        let safety = Frame::command(TimerValue::SAFETY.command_byte());
        let arm = Frame::command(TimerValue::from_seconds(180).value.command_byte());

        assert_eq!(safety, Frame::pad(&[0x0C]).unwrap());
        assert_eq!(arm, Frame::pad(&[0x12]).unwrap());
        assert_ne!(safety, arm);
    }
}

mod timer_laws {
    use super::*;

    proptest! {
        #[test]
        fn normalized_value_follows_clamp_rule(seconds in -10_000i64..20_000) {
            let setting = TimerValue::from_seconds(seconds);
            let units = seconds / 10;

            if (1..=127).contains(&units) {
                prop_assert_eq!(i64::from(setting.value.units()), units);
                if units < 12 {
                    prop_assert_eq!(setting.issue, Some(TimerIssue::Unwise { requested_secs: seconds }));
                } else {
                    prop_assert_eq!(setting.issue, None);
                }
            } else {
                prop_assert_eq!(setting.value, TimerValue::DEFAULT);
                let out_of_range_issue = matches!(
                    setting.issue,
                    Some(TimerIssue::BelowMinimum { .. }) | Some(TimerIssue::AboveMaximum { .. })
                );
                prop_assert!(out_of_range_issue);
            }
        }

        #[test]
        fn normalized_value_is_always_in_range(seconds in any::<i64>()) {
            let value = TimerValue::from_seconds(seconds).value;
            prop_assert!(value >= TimerValue::MIN && value <= TimerValue::MAX);
        }
    }

    #[test]
    fn test_scenario_c_corrections() {
        let short = TimerValue::from_seconds(5);
        assert_eq!(short.value.units(), 18);
        assert!(matches!(short.issue, Some(TimerIssue::BelowMinimum { .. })));

        let long = TimerValue::from_seconds(2000);
        assert_eq!(long.value.units(), 18);
        assert!(matches!(long.issue, Some(TimerIssue::AboveMaximum { .. })));

        let unwise = TimerValue::from_seconds(90);
        assert_eq!(unwise.value.units(), 9);
        assert!(matches!(unwise.issue, Some(TimerIssue::Unwise { .. })));
    }
}

mod identity {
    use super::*;

    proptest! {
        #[test]
        fn hex_and_decimal_forms_agree(id in any::<u16>()) {
            prop_assert_eq!(parse_usb_id(&format!("0x{:04x}", id)), Ok(id));
            prop_assert_eq!(parse_usb_id(&format!("0X{:X}", id)), Ok(id));
            prop_assert_eq!(parse_usb_id(&id.to_string()), Ok(id));
        }
    }

    #[test]
    fn test_identity_from_parsed_ids() {
        let identity = DeviceIdentity::new(
            parse_usb_id("0x5131").unwrap(),
            parse_usb_id("0x2007").unwrap(),
        );
        assert_eq!(identity, DeviceIdentity::default());
    }
}
