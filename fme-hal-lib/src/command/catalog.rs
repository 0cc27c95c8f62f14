//! Named commands understood by the picker, AUX, serial and QR boards.

use itertools::Itertools;
use std::{fmt::Display, str::FromStr};
use thiserror::Error;

use super::{CommandSpec, SpecError};
use crate::protocol::AddressSelector::{self, Aux, Picker, Qr, Serial};

// Operation timeouts per actuator family.
const ROLLER_TIMEOUT: u64 = 10_000;
const GRIPPER_TIMEOUT: u64 = 10_000;
const TRACK_TIMEOUT: u64 = 10_000;
const VEND_DOOR_TIMEOUT: u64 = 30_000;
const QLM_TIMEOUT: u64 = 30_000;

macro_rules! catalog {
    ($($variant:ident => $name:literal, $spec:expr;)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Command {
            $($variant,)*
        }

        impl Command {
            pub const ALL: &'static [Command] = &[$(Command::$variant,)*];

            pub fn name(self) -> &'static str {
                match self {
                    $(Command::$variant => $name,)*
                }
            }

            pub fn spec(self) -> CommandSpec {
                match self {
                    $(Command::$variant => $spec,)*
                }
            }
        }
    };
}

fn cmd(address: AddressSelector, opcode: &str) -> CommandSpec {
    CommandSpec::new(address, opcode)
}

catalog! {
    Reset => "RESET", cmd(Serial, "X").wait(60_000);

    QlmEngage => "QLM_ENGAGE", cmd(Aux, "M1").status(6, 500, QLM_TIMEOUT).reset(&["K1"]);
    QlmDisengage => "QLM_DISENGAGE", cmd(Aux, "L1").status(5, 500, QLM_TIMEOUT).reset(&["K1"]);
    QlmHalt => "QLM_HALT", cmd(Aux, "K1");
    QlmLift => "QLM_LIFT", cmd(Aux, "M1");
    QlmDrop => "QLM_DROP", cmd(Aux, "L1");
    QlmDoorLock => "QLM_DOOR_LOCK", cmd(Aux, "P2");
    QlmDoorUnlock => "QLM_DOOR_UNLOCK", cmd(Aux, "O2");

    SensorBarOn => "SENSOR_BAR_ON", cmd(Picker, "O1");
    SensorBarOff => "SENSOR_BAR_OFF", cmd(Picker, "P1");
    AudioOn => "AUDIO_ON", cmd(Serial, "I");
    AudioOff => "AUDIO_OFF", cmd(Serial, "J");

    RollerIn => "ROLLER_IN", cmd(Picker, "J4");
    RollerOut => "ROLLER_OUT", cmd(Picker, "I4");
    RollerStop => "ROLLER_STOP", cmd(Picker, "K4");
    RollerToPos1 => "ROLLER_TO_POS_1", cmd(Picker, "U1").status(18, 20, ROLLER_TIMEOUT).reset(&["K4", "P1"]);
    RollerToPos2 => "ROLLER_TO_POS_2", cmd(Picker, "U2").status(19, 20, ROLLER_TIMEOUT).reset(&["K4", "P1"]);
    RollerToPos3 => "ROLLER_TO_POS_3", cmd(Picker, "U3").status(20, 20, ROLLER_TIMEOUT).reset(&["K4", "P1"]);
    RollerToPos4 => "ROLLER_TO_POS_4", cmd(Picker, "T4").status(15, 20, ROLLER_TIMEOUT).reset(&["K4", "P1"]);
    RollerToPos5 => "ROLLER_TO_POS_5", cmd(Picker, "T5").status(16, 20, ROLLER_TIMEOUT).reset(&["K4", "P1"]);
    RollerToPos6 => "ROLLER_TO_POS_6", cmd(Picker, "T6").status(17, 20, ROLLER_TIMEOUT).reset(&["K4", "P1"]);

    FraudSensorEnablePowerTransistor => "FRAUD_SENSOR_ENABLE_POWER_TRANSISTOR", cmd(Picker, "O4");
    FraudSensorDisablePowerTransistor => "FRAUD_SENSOR_DISABLE_POWER_TRANSISTOR", cmd(Picker, "P4");
    FraudSensorEnableTransistor => "FRAUD_SENSOR_ENABLE_TRANSISTOR", cmd(Picker, "O3");
    // Same opcode as the power transistor; kept until the board docs say otherwise.
    FraudSensorDisableTransistor => "FRAUD_SENSOR_DISABLE_TRANSISTOR", cmd(Picker, "P4");
    RinglightOn => "RINGLIGHT_ON", cmd(Picker, "O2");
    RinglightOff => "RINGLIGHT_OFF", cmd(Picker, "P2");
    Junction4On => "JUNCTION_4_ON", cmd(Picker, "O1");
    Junction4Off => "JUNCTION_4_OFF", cmd(Picker, "P1");

    AuxSensorsOn => "AUX_SENSORS_ON", cmd(Aux, "O1");
    AuxSensorsOff => "AUX_SENSORS_OFF", cmd(Aux, "P1");
    AuxSensorsRead => "AUX_SENSORS_READ", cmd(Aux, "R");
    PowerAux20 => "POWER_AUX_20", cmd(Aux, "O3");
    DisableAux20 => "DISABLE_AUX_20", cmd(Aux, "P3");
    PowerAux21 => "POWER_AUX_21", cmd(Aux, "O4");
    DisableAux21 => "DISABLE_AUX_21", cmd(Aux, "P4");

    VendDoorOpen => "VEND_DOOR_OPEN", cmd(Aux, "M2").status(8, 60, VEND_DOOR_TIMEOUT).reset(&["K2"]);
    VendDoorRent => "VEND_DOOR_RENT", cmd(Aux, "V").status(10, 60, VEND_DOOR_TIMEOUT).reset(&["K2"]);
    VendDoorClose => "VEND_DOOR_CLOSE", cmd(Aux, "L2").status(7, 60, VEND_DOOR_TIMEOUT).reset(&["K2"]);
    VendDoorKill => "VEND_DOOR_KILL", cmd(Aux, "K2");
    VendDoorDriveClose => "VEND_DOOR_DRIVE_CLOSE", cmd(Aux, "J2");
    VendDoorDriveOpen => "VEND_DOOR_DRIVE_OPEN", cmd(Aux, "I2");

    ReadPickerInputs => "READ_PICKER_INPUTS", cmd(Picker, "R");
    GripperExtendHalt => "GRIPPER_EXTEND_HALT", cmd(Picker, "K1");
    ExtendGripperArmForTime => "EXTEND_GRIPPER_ARM_FOR_TIME", cmd(Picker, "I1");
    GripperExtend => "GRIPPER_EXTEND", cmd(Picker, "L1").status(5, 50, GRIPPER_TIMEOUT).reset(&["K1"]);
    GripperRetract => "GRIPPER_RETRACT", cmd(Picker, "M1").status(6, 50, GRIPPER_TIMEOUT).reset(&["K1"]);
    GripperOpen => "GRIPPER_OPEN", cmd(Picker, "M3").status(10, 50, GRIPPER_TIMEOUT).reset(&["K3"]);
    GripperRent => "GRIPPER_RENT", cmd(Picker, "V").status(12, 50, GRIPPER_TIMEOUT).reset(&["K3"]);
    GripperClose => "GRIPPER_CLOSE", cmd(Picker, "L3").status(9, 50, GRIPPER_TIMEOUT).reset(&["K3"]);
    TrackOpen => "TRACK_OPEN", cmd(Picker, "M2").status(8, 50, TRACK_TIMEOUT).reset(&["K2"]);
    TrackClose => "TRACK_CLOSE", cmd(Picker, "L2").status(7, 50, TRACK_TIMEOUT).reset(&["K2"]);

    VersionSerial => "VERSION_SERIAL", cmd(Serial, "Y");
    VersionPicker => "VERSION_PICKER", cmd(Picker, "W");
    VersionAux => "VERSION_AUX", cmd(Aux, "W");
    StatusPicker => "STATUS_PICKER", cmd(Picker, "S");
    StatusAux => "STATUS_AUX", cmd(Aux, "S");

    TurnOnGreenButtonLed => "TURN_ON_GREEN_BUTTON_LED", cmd(Qr, "I1");
    TurnOffGreenButtonLed => "TURN_OFF_GREEN_BUTTON_LED", cmd(Qr, "I3");
    BlinkGreenButtonLed => "BLINK_GREEN_BUTTON_LED", cmd(Qr, "I2");
    TurnOnRedButtonLed => "TURN_ON_RED_BUTTON_LED", cmd(Qr, "R1");
    TurnOffRedButtonLed => "TURN_OFF_RED_BUTTON_LED", cmd(Qr, "R3");
    BlinkRedButtonLed => "BLINK_RED_BUTTON_LED", cmd(Qr, "R2");
    TurnOnGreenArrowLed => "TURN_ON_GREEN_ARROW_LED", cmd(Qr, "T1");
    TurnOffGreenArrowLed => "TURN_OFF_GREEN_ARROW_LED", cmd(Qr, "T3");
    BlinkGreenArrowLed => "BLINK_GREEN_ARROW_LED", cmd(Qr, "T2");
    TurnOnRedArrowLed => "TURN_ON_RED_ARROW_LED", cmd(Qr, "Z1");
    TurnOffRedArrowLed => "TURN_OFF_RED_ARROW_LED", cmd(Qr, "Z3");
    BlinkRedArrowLed => "BLINK_RED_ARROW_LED", cmd(Qr, "Z2");
    TurnOnBackLight => "TURN_ON_BACK_LIGHT", cmd(Qr, "W1");
    TurnOffBackLight => "TURN_OFF_BACK_LIGHT", cmd(Qr, "W3");
    BlinkBackLight => "BLINK_BACK_LIGHT", cmd(Qr, "W2");
    SendText => "SEND_TEXT", cmd(Qr, "S{0}");
    ClearDisplayMemory => "CLEAR_DISPLAY_MEMORY", cmd(Qr, "X{0}");
    SideTerminalVersion => "SIDE_TERMINAL_VERSION", cmd(Qr, "Y");
    ReadQrButton => "READ_QR_BUTTON", cmd(Qr, "J");
    ClearQrButtonStatus => "CLEAR_QR_BUTTON_STATUS", cmd(Qr, "K");
    TurnOffPixels => "TURN_OFF_PIXELS", cmd(Qr, "U90");
    SetTextOnlyDisplayMode => "SET_TEXT_ONLY_DISPLAY_MODE", cmd(Qr, "U94");
    SetGraphicsOnlyDisplayMode => "SET_GRAPHICS_ONLY_DISPLAY_MODE", cmd(Qr, "U98");
    DisplaySettingQr => "DISPLAY_SETTING_QR", cmd(Qr, "U80");
    DisplaySettingExor => "DISPLAY_SETTING_EXOR", cmd(Qr, "U81");
    DisplaySettingAnd => "DISPLAY_SETTING_AND", cmd(Qr, "U83");
    SetStartTextPagePointer => "SET_START_TEXT_PAGE_POINTER", cmd(Qr, "M{0}");
    SetStartGraphicsPagePointer => "SET_START_GRAPHICS_PAGE_POINTER", cmd(Qr, "L{0}");
    SetMemoryWritePointer => "SET_MEMORY_WRITE_POINTER", cmd(Qr, "V{0}");
    SetTextColumns => "SET_TEXT_COLUMNS", cmd(Qr, "O{0}");
    SetGraphicsColumns => "SET_GRAPHICS_COLUMNS", cmd(Qr, "N{0}");
    WriteGraphicData => "WRITE_GRAPHIC_DATA", cmd(Qr, "g{0}");
    WriteGraphicDataToEeprom => "WRITE_GRAPHIC_DATA_TO_EEPROM", cmd(Qr, "l{0}");
    SetEepromPointer => "SET_EEPROM_POINTER", cmd(Qr, "d{0}");
    LoadFromEepromToDisplayMemory => "LOAD_FROM_EEPROM_TO_DISPLAY_MEMORY", cmd(Qr, "m");
    TerminalRevision => "TERMINAL_REVISION", cmd(Qr, "c");
}

impl Command {
    pub fn address(self) -> AddressSelector {
        self.spec().address
    }

    /// Catalog spec with `arg` bound, if one is given.
    pub fn bind(self, arg: Option<&str>) -> Result<CommandSpec, SpecError> {
        let spec = self.spec();
        match arg {
            Some(arg) => spec.bind(arg),
            None => Ok(spec),
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.name().fmt(f)
    }
}

#[derive(Error, Debug)]
pub enum CommandParseError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
}

impl FromStr for Command {
    type Err = CommandParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let name = input.trim().to_ascii_uppercase().replace('-', "_");
        Command::ALL
            .iter()
            .copied()
            .find(|c| c.name() == name)
            .ok_or_else(|| CommandParseError::UnknownCommand(input.to_string()))
    }
}

/// Commands addressed to `board`, in name order.
pub fn list_commands(board: Option<AddressSelector>) -> Vec<Command> {
    Command::ALL
        .iter()
        .copied()
        .filter(|c| board.map_or(true, |b| c.address() == b))
        .sorted_by_key(|c| (c.address(), c.name()))
        .collect()
}

/// Checks every entry before anything is put on the bus. Entries that
/// take an argument are checked with a dummy one bound.
pub fn validate() -> Result<(), SpecError> {
    Command::ALL.iter().try_for_each(|c| {
        let spec = c.spec();
        if spec.needs_argument() {
            spec.bind("0")?.validate()
        } else {
            spec.validate()
        }
    })
}
