//! The slave's addressable memory image: four independently sized arrays,
//! owned by the caller and referenced by the dispatcher only for the
//! duration of a single `manage` call.

use crate::errors::ConfigValidationError;

pub const MAX_REPORT_SLAVE_ID_LEN: usize = 75;

#[derive(Debug, Clone)]
pub struct DataMap {
    pub coils: Vec<bool>,
    pub discrete_inputs: Vec<bool>,
    pub holding_registers: Vec<u16>,
    pub input_registers: Vec<u16>,
    /// Status byte returned by function 0x07 (read exception status).
    pub exception_status: u8,
    /// Vendor payload returned by function 0x11 (report slave id), capped at
    /// [`MAX_REPORT_SLAVE_ID_LEN`] bytes.
    pub slave_id_data: Vec<u8>,
}

impl DataMap {
    pub fn new(coils: usize, discrete_inputs: usize, holding_registers: usize, input_registers: usize) -> Self {
        Self {
            coils: vec![false; coils],
            discrete_inputs: vec![false; discrete_inputs],
            holding_registers: vec![0; holding_registers],
            input_registers: vec![0; input_registers],
            exception_status: 0,
            slave_id_data: Vec::new(),
        }
    }

    pub fn with_slave_id_data(mut self, data: Vec<u8>) -> Result<Self, ConfigValidationError> {
        if data.len() > MAX_REPORT_SLAVE_ID_LEN {
            return Err(ConfigValidationError::config(format!(
                "report_slave_id payload of {} bytes exceeds the {}-byte limit",
                data.len(),
                MAX_REPORT_SLAVE_ID_LEN
            )));
        }
        self.slave_id_data = data;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_zero_fills_all_arrays() {
        let map = DataMap::new(8, 8, 4, 4);
        assert_eq!(map.coils, vec![false; 8]);
        assert_eq!(map.holding_registers, vec![0u16; 4]);
    }

    #[test]
    fn oversized_slave_id_data_is_rejected() {
        let map = DataMap::new(0, 0, 0, 0);
        assert!(map.with_slave_id_data(vec![0u8; 76]).is_err());
    }
}
