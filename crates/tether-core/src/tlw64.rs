//! # TLW64 Frame Layouts
//!
//! Byte layouts for the TLW64 band family. Every frame is written to the
//! control characteristic as `[opcode, payload...]`.
//!
//! ## Frame Table
//! ```text
//! ┌──────────────────┬────────┬──────────────────────────────────────────────┐
//! │ Frame            │ Opcode │ Payload                                      │
//! ├──────────────────┼────────┼──────────────────────────────────────────────┤
//! │ Display settings │  0xa0  │ units(1=km,2=mi) clock(1=24h,2=12h)          │
//! │ Date/time        │  0xa3  │ year/256 year%256 month+1 day hh mm ss       │
//! │ User data        │  0xa9  │ 16 bytes, see `user_data`                    │
//! │ Alarm/vibrate    │  0xab  │ 0 0 0 duration count 7 1                     │
//! │ Notification     │  0xc1  │ header text[..18] | type | stop              │
//! │ Icon             │  0xc3  │ icon id                                      │
//! └──────────────────┴────────┴──────────────────────────────────────────────┘
//! ```
//!
//! These layouts are a wire contract with shipped firmware. Reproduce them
//! bit-for-bit; the unknown bytes were sniffed from the vendor app.

use chrono::{Datelike, NaiveDateTime, Timelike};
use encoding_rs::{EncoderResult, EUC_JP};
use uuid::Uuid;

use crate::family::{AlertCategory, DeviceEvent, DeviceFamily, DeviceIntent, IconKind, InitContext, NotificationKind};
use crate::frame::Command;
use crate::transaction::Transaction;
use crate::types::{ActivityUser, DeviceState, Gender, MeasurementSystem, TimeFormat};

// =============================================================================
// Constants
// =============================================================================

pub const SERVICE: Uuid = Uuid::from_u128(0x0000_55ff_0000_1000_8000_0080_5f9b_34fb);
pub const CONTROL_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000_33f1_0000_1000_8000_0080_5f9b_34fb);

pub const CMD_DISPLAY_SETTINGS: u8 = 0xa0;
pub const CMD_DATETIME: u8 = 0xa3;
pub const CMD_USER_DATA: u8 = 0xa9;
pub const CMD_ALARM: u8 = 0xab;
pub const CMD_NOTIFICATION: u8 = 0xc1;
pub const CMD_ICON: u8 = 0xc3;

pub const NOTIFICATION_HEADER: u8 = 0x01;
pub const NOTIFICATION_STOP: u8 = 0x02;
pub const NOTIFICATION_CALL: u8 = 0x04;
pub const NOTIFICATION_SMS: u8 = 0x05;

pub const ICON_WECHAT: u8 = 0x03;
pub const ICON_MAIL: u8 = 0x05;

/// Notification text is cut to this many encoded bytes.
pub const MAX_TEXT_BYTES: usize = 18;

/// Stride fallbacks (cm) when the profile has no height.
pub const DEFAULT_STRIDE_FEMALE: u8 = 70;
pub const DEFAULT_STRIDE_MALE: u8 = 78;

const STRIDE_FACTOR_FEMALE: f64 = 0.413;
const STRIDE_FACTOR_MALE: f64 = 0.415;

/// Display timeout in seconds, pushed with the user data.
const SCREEN_ON_SECS: u8 = 5;

// =============================================================================
// Frame Builders
// =============================================================================

/// Date/time frame. Year is split big-endian as `(year / 256, year % 256)`,
/// month is 1-based.
pub fn datetime(t: &NaiveDateTime) -> Command {
    let year = t.year();
    Command::new(
        CMD_DATETIME,
        vec![
            (year / 256) as u8,
            (year % 256) as u8,
            (t.month0() + 1) as u8,
            t.day() as u8,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
        ],
    )
}

pub fn display_settings(units: MeasurementSystem, time_format: TimeFormat) -> Command {
    let units = match units {
        MeasurementSystem::Metric => 1,
        MeasurementSystem::Imperial => 2,
    };
    let clock = match time_format {
        TimeFormat::H24 => 1,
        TimeFormat::H12 => 2,
    };
    Command::new(CMD_DISPLAY_SETTINGS, vec![units, clock])
}

/// Estimated stride length in cm: `ceil(height * 0.413)` for the female
/// profile, `ceil(height * 0.415)` otherwise, 70/78 when height is unset.
pub fn stride_length_cm(user: &ActivityUser) -> u8 {
    let height = user.height_cm.filter(|h| *h != 0);
    let (factor, fallback) = match user.gender {
        Gender::Female => (STRIDE_FACTOR_FEMALE, DEFAULT_STRIDE_FEMALE),
        Gender::Male | Gender::Other => (STRIDE_FACTOR_MALE, DEFAULT_STRIDE_MALE),
    };

    match height {
        // Narrowing wraps like the firmware's reference encoder.
        Some(h) => (f64::from(h) * factor).ceil() as u32 as u8,
        None => fallback,
    }
}

/// User data frame.
///
/// ```text
/// idx  0   1      2   3       4   5  6  7        8        9      10   11  12   13     14    15
///      ?   stride ?   weight  5   ?  ?  goal/256 goal%256 raise  0xff ?   age  gender lost  2
/// ```
pub fn user_data(user: &ActivityUser) -> Command {
    let gender = match user.gender {
        Gender::Female => 2,
        Gender::Male | Gender::Other => 1,
    };

    Command::new(
        CMD_USER_DATA,
        vec![
            0,
            stride_length_cm(user),
            0,
            user.weight_kg as u8,
            SCREEN_ON_SECS,
            0,
            0,
            (user.steps_goal / 256) as u8,
            (user.steps_goal % 256) as u8,
            1, // raise hand to wake
            0xff,
            0,
            user.age,
            gender,
            0, // lost-device alert off
            2,
        ],
    )
}

pub fn vibrate(duration: u8, count: u8) -> Command {
    Command::new(CMD_ALARM, vec![0, 0, 0, duration, count, 7, 1])
}

pub fn icon(icon_id: u8) -> Command {
    Command::new(CMD_ICON, vec![icon_id])
}

/// Text frame of a notification. The text is EUC-JP encoded and cut to
/// [`MAX_TEXT_BYTES`] raw bytes, which may split a multi-byte character.
pub fn notification_text(text: &str) -> Command {
    let mut payload = Vec::with_capacity(1 + MAX_TEXT_BYTES);
    payload.push(NOTIFICATION_HEADER);
    payload.extend_from_slice(&encode_legacy_text(text));
    Command::new(CMD_NOTIFICATION, payload)
}

pub fn notification_type(kind: u8) -> Command {
    Command::new(CMD_NOTIFICATION, vec![kind])
}

pub fn notification_stop() -> Command {
    Command::new(CMD_NOTIFICATION, vec![NOTIFICATION_STOP])
}

/// Encodes `text` as EUC-JP, substituting `?` for unmappable characters,
/// and truncates to [`MAX_TEXT_BYTES`].
pub fn encode_legacy_text(text: &str) -> Vec<u8> {
    let mut encoder = EUC_JP.new_encoder();
    let mut out = Vec::with_capacity(text.len() + 8);
    let mut src = text;

    loop {
        let (result, read) = encoder.encode_from_utf8_to_vec_without_replacement(src, &mut out, true);
        src = &src[read..];
        match result {
            EncoderResult::InputEmpty => break,
            EncoderResult::Unmappable(_) => out.push(b'?'),
            EncoderResult::OutputFull => out.reserve(src.len() * 3 + 8),
        }
    }

    out.truncate(MAX_TEXT_BYTES);
    out
}

// =============================================================================
// Family Strategy
// =============================================================================

/// The TLW64 band.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tlw64;

impl DeviceFamily for Tlw64 {
    fn name(&self) -> &'static str {
        "tlw64"
    }

    fn service(&self) -> Uuid {
        SERVICE
    }

    fn control_characteristic(&self) -> Uuid {
        CONTROL_CHARACTERISTIC
    }

    fn encode_command(&self, intent: &DeviceIntent) -> Vec<Command> {
        match intent {
            DeviceIntent::SetTime(t) => vec![datetime(t)],
            DeviceIntent::DisplaySettings { units, time_format } => {
                vec![display_settings(*units, *time_format)]
            }
            DeviceIntent::UserProfile(user) => vec![user_data(user)],
            DeviceIntent::Vibrate { duration, count } => vec![vibrate(*duration, *count)],
            DeviceIntent::ShowIcon(kind) => {
                let id = match kind {
                    IconKind::Mail => ICON_MAIL,
                    IconKind::WeChat => ICON_WECHAT,
                };
                vec![icon(id)]
            }
            DeviceIntent::ShowNotification { category, text } => {
                let kind = match category {
                    AlertCategory::Sms => NOTIFICATION_SMS,
                    AlertCategory::Call => NOTIFICATION_CALL,
                };
                vec![notification_text(text), notification_type(kind)]
            }
            DeviceIntent::StopNotification => vec![notification_stop()],
        }
    }

    fn initial_transaction(&self, ctx: &InitContext) -> Transaction {
        Transaction::builder("initialize")
            .marker(DeviceState::Initializing)
            .write(datetime(&ctx.now))
            .write(display_settings(ctx.units, ctx.time_format))
            .write(user_data(&ctx.user))
            .marker(DeviceState::Initialized)
            .build()
    }

    fn intents_for(&self, event: &DeviceEvent) -> Vec<DeviceIntent> {
        let buzz = |duration, count| DeviceIntent::Vibrate { duration, count };

        match event {
            DeviceEvent::Notification { kind, sender } => {
                let show = match kind {
                    NotificationKind::Sms => DeviceIntent::ShowNotification {
                        category: AlertCategory::Sms,
                        text: sender.clone(),
                    },
                    NotificationKind::WeChat => DeviceIntent::ShowIcon(IconKind::WeChat),
                    NotificationKind::Other => DeviceIntent::ShowIcon(IconKind::Mail),
                };
                vec![show, buzz(1, 1)]
            }
            DeviceEvent::IncomingCall { caller } => vec![
                DeviceIntent::ShowNotification {
                    category: AlertCategory::Call,
                    text: caller.clone(),
                },
                buzz(3, 5),
            ],
            DeviceEvent::CallEnded => vec![DeviceIntent::StopNotification, buzz(0, 0)],
            DeviceEvent::FindDevice { start: true } => vec![buzz(1, 3)],
            DeviceEvent::FindDevice { start: false } => Vec::new(),
            DeviceEvent::SetTime(t) => vec![DeviceIntent::SetTime(*t)],
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
