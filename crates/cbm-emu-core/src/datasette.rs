/// Datasette transport buttons, in the order of their event codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DatasetteCommand {
    #[default]
    Stop,
    Start,
    Forward,
    Rewind,
    Record,
    Reset,
    ResetCounter,
}

impl DatasetteCommand {
    pub const ALL: [Self; 7] = [
        Self::Stop,
        Self::Start,
        Self::Forward,
        Self::Rewind,
        Self::Record,
        Self::Reset,
        Self::ResetCounter,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Start => "start",
            Self::Forward => "forward",
            Self::Rewind => "rewind",
            Self::Record => "record",
            Self::Reset => "reset",
            Self::ResetCounter => "reset counter",
        }
    }
}
