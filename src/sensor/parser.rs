// src/sensor/parser.rs

use crate::common::{
    command::{Command, CommandCode, MAX_NV_WRITE_CHUNK},
    error::GoIoError,
    packet::{split_command, Packet},
};

/// Parses a raw command packet into a structured [`Command`].
///
/// Only the framing is checked here: a known code and a parameter count that fits the packet.
/// Whether the parameters make sense for the command is left to [`params_are_valid`].
///
/// # Arguments
///
/// * `packet`: One host-to-device packet (`[code, n_params, params...]`).
///
/// # Returns
///
/// * `Ok(Command)`: If the packet carries a known command.
/// * `Err(GoIoError::InvalidPacket)`: If the parameter count is impossible.
/// * `Err(GoIoError::InvalidParameter)`: If the code byte names no command.
pub fn parse_command_packet(packet: &Packet) -> Result<Command, GoIoError<()>> {
    let (code, params) = split_command(packet).ok_or(GoIoError::InvalidPacket)?;
    let code = CommandCode::from_u8(code).ok_or(GoIoError::InvalidParameter("unknown command code"))?;
    Command::with_params(code, params)
}

/// Whether the parameter block has the length and layout `command.code` expects.
pub fn params_are_valid(command: &Command) -> bool {
    let p = command.params.as_slice();
    match command.code {
        CommandCode::ReadLocalNvMem | CommandCode::ReadRemoteNvMem => p.len() == 2,
        // [target, addr, count, data...]
        CommandCode::WriteNvMem => {
            p.len() >= 4
                && (p[2] as usize) <= MAX_NV_WRITE_CHUNK
                && p.len() == 3 + p[2] as usize
        }
        CommandCode::SetMeasurementPeriod => p.len() == 4,
        CommandCode::SetAnalogInputChannel => p.len() == 1,
        _ => p.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::command::NvMemTarget;
    use crate::common::packet::encode_command;

    #[test]
    fn test_parse_encoded_commands() {
        let cmd = Command::set_measurement_period(1000);
        assert_eq!(parse_command_packet(&encode_command(&cmd)).unwrap(), cmd);

        let cmd = Command::new(CommandCode::GetSensorId);
        let parsed = parse_command_packet(&encode_command(&cmd)).unwrap();
        assert_eq!(parsed.code, CommandCode::GetSensorId);
        assert!(parsed.params.is_empty());
    }

    #[test]
    fn test_parse_invalid_packets() {
        assert!(matches!(
            parse_command_packet(&[0x1A, 7, 0, 0, 0, 0, 0, 0]),
            Err(GoIoError::InvalidPacket)
        ));
        assert!(matches!(
            parse_command_packet(&[0x55, 0, 0, 0, 0, 0, 0, 0]),
            Err(GoIoError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_params_validation() {
        assert!(params_are_valid(&Command::read_nv_mem(NvMemTarget::Local, 0, 128)));
        assert!(params_are_valid(&Command::write_nv_mem(NvMemTarget::Remote, 3, &[1, 2]).unwrap()));
        assert!(params_are_valid(&Command::new(CommandCode::Init)));

        // Count byte disagrees with the data that follows
        let bad_write = Command::with_params(CommandCode::WriteNvMem, &[0, 0, 3, 1]).unwrap();
        assert!(!params_are_valid(&bad_write));
        let bad_period = Command::with_params(CommandCode::SetMeasurementPeriod, &[1, 0]).unwrap();
        assert!(!params_are_valid(&bad_period));
        let bad_init = Command::with_params(CommandCode::Init, &[1]).unwrap();
        assert!(!params_are_valid(&bad_init));
    }
}
