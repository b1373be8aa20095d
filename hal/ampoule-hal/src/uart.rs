//! UART serial communication abstractions
//!
//! Provides blocking traits for serial links. GSIOC is strictly
//! request/response with a single outstanding exchange, so there is no
//! async variant.

/// Broad classification of a serial error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartErrorKind {
    /// Nothing arrived within the read window
    Timeout,
    /// Anything else (device unplugged, framing error, OS failure)
    Other,
}

/// Error types produced by UART implementations
pub trait UartError: core::fmt::Debug {
    /// Classify this error
    fn kind(&self) -> UartErrorKind;
}

/// UART transmitter
pub trait UartTx {
    /// Error type for transmit operations
    type Error: UartError;

    /// Write data to the UART
    ///
    /// Blocks until all data has been written or an error occurs.
    fn write_blocking(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Flush any buffered data
    fn flush(&mut self) -> Result<(), Self::Error>;
}

/// UART receiver
pub trait UartRx {
    /// Error type for receive operations
    type Error: UartError;

    /// Read data from the UART
    ///
    /// Blocks until at least one byte is available, the read window
    /// elapses, or an error occurs. Returns the number of bytes read.
    fn read_blocking(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Read a single byte from the UART
    fn read_byte(&mut self) -> Result<u8, Self::Error> {
        let mut buf = [0u8; 1];
        loop {
            if self.read_blocking(&mut buf)? == 1 {
                return Ok(buf[0]);
            }
        }
    }

    /// Discard anything already received but not yet read
    fn discard_pending(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Combined UART interface
///
/// For links that provide both TX and RX on a single handle.
pub trait Uart: UartTx + UartRx<Error = <Self as UartTx>::Error> {}

// Blanket implementation
impl<T> Uart for T where T: UartTx + UartRx<Error = <T as UartTx>::Error> {}

/// Baud rate mandated by GSIOC
pub const GSIOC_BAUDRATE: u32 = 19_200;

/// UART configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UartConfig {
    /// Baud rate in bits per second
    pub baudrate: u32,
    /// Number of data bits
    pub data_bits: DataBits,
    /// Parity mode
    pub parity: Parity,
    /// Number of stop bits
    pub stop_bits: StopBits,
}

impl UartConfig {
    /// Framing used by every GSIOC device: 19200 baud, 8 data bits,
    /// even parity, one stop bit
    pub const fn gsioc() -> Self {
        Self {
            baudrate: GSIOC_BAUDRATE,
            data_bits: DataBits::Eight,
            parity: Parity::Even,
            stop_bits: StopBits::One,
        }
    }
}

impl Default for UartConfig {
    fn default() -> Self {
        Self::gsioc()
    }
}

/// Number of data bits per frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBits {
    Seven,
    Eight,
}

/// Parity mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Never;

    impl UartError for Never {
        fn kind(&self) -> UartErrorKind {
            UartErrorKind::Other
        }
    }

    /// Returns zero bytes a few times before yielding data
    struct SlowRx {
        empty_reads: u8,
        byte: u8,
    }

    impl UartRx for SlowRx {
        type Error = Never;

        fn read_blocking(&mut self, buf: &mut [u8]) -> Result<usize, Never> {
            if self.empty_reads > 0 {
                self.empty_reads -= 1;
                return Ok(0);
            }
            buf[0] = self.byte;
            Ok(1)
        }
    }

    #[test]
    fn test_default_is_gsioc_framing() {
        let config = UartConfig::default();
        assert_eq!(config.baudrate, 19_200);
        assert_eq!(config.data_bits, DataBits::Eight);
        assert_eq!(config.parity, Parity::Even);
        assert_eq!(config.stop_bits, StopBits::One);
    }

    #[test]
    fn test_read_byte_skips_empty_reads() {
        let mut rx = SlowRx {
            empty_reads: 3,
            byte: 0x42,
        };
        assert_eq!(rx.read_byte().unwrap(), 0x42);
        assert_eq!(rx.empty_reads, 0);
    }

    #[test]
    fn test_discard_pending_default_is_noop() {
        let mut rx = SlowRx {
            empty_reads: 0,
            byte: 0,
        };
        assert!(rx.discard_pending().is_ok());
    }
}
