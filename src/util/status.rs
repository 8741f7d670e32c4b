#[derive(Default, Eq, PartialEq, Debug, Clone, Copy)]
pub enum AFCodecStatus {
    #[default]
    None,
    Opened,
    Started,
    Ended,
    Stopped,
}
