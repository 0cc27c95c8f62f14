use super::{OpenPortError, PortConfig};

use anyhow::Result;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

pub fn do_open_port(config: &PortConfig) -> Result<Box<dyn SerialPort>> {
    if config.rs485 {
        return Err(OpenPortError::Rs485Error {
            port_name: config.port_name.clone(),
        }
        .into());
    }

    Ok(serialport::new(&config.port_name, config.baudrate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(config.read_timeout)
        .open()?)
}

// TODO: walk the OS handle table like the linux backend does
pub fn is_port_open(_port_name: &str) -> bool {
    false
}
