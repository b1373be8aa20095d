//! Direct injection module commands

use crate::command::{BufferedCommand, CommandError, CommandText, ImmediateCommand};

/// Factory device id of the injector
pub const DEFAULT_INJECTOR_ID: u8 = 6;

/// Injector queries (immediate commands)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectorQuery {
    /// `%` - firmware identification
    ModuleId,
    /// `$` - master reset
    Reset,
    /// `e` - current error number
    ReadError,
    /// `X` - `R` moving, `L` load, `I` inject
    Status,
}

impl InjectorQuery {
    /// Wire command for this query
    pub const fn command(self) -> ImmediateCommand {
        let code = match self {
            InjectorQuery::ModuleId => b'%',
            InjectorQuery::Reset => b'$',
            InjectorQuery::ReadError => b'e',
            InjectorQuery::Status => b'X',
        };
        ImmediateCommand::from_table(code)
    }
}

/// Injector actions (buffered commands)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectorCommand {
    /// `e` - clear the current error
    ClearError,
    /// `e{n}` - raise an error (diagnostics)
    RaiseError(u16),
    /// `VI` - switch the valve to inject
    Inject,
    /// `VL` - switch the valve to load
    Load,
}

impl InjectorCommand {
    /// Encode into a buffered command frame
    pub fn encode(&self) -> Result<BufferedCommand, CommandError> {
        let mut text = CommandText::new();
        match self {
            InjectorCommand::ClearError => {
                text.push_char('e')?;
            }
            InjectorCommand::RaiseError(code) => {
                text.push_char('e')?.push_uint(*code as u32)?;
            }
            InjectorCommand::Inject => {
                text.push_str("VI")?;
            }
            InjectorCommand::Load => {
                text.push_str("VL")?;
            }
        }
        text.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valve_commands() {
        assert_eq!(InjectorCommand::Inject.encode().unwrap().as_str(), "VI");
        assert_eq!(InjectorCommand::Load.encode().unwrap().as_str(), "VL");
        assert_eq!(InjectorCommand::RaiseError(3).encode().unwrap().as_str(), "e3");
    }

    #[test]
    fn test_status_query() {
        assert_eq!(InjectorQuery::Status.command().as_char(), 'X');
    }
}
