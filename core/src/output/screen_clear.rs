/// Erase-entire-display: ESC[2J.
const ERASE_DISPLAY: &[u8] = b"\x1b[2J";

/// Cursor home: ESC[H. At the start of a chunk this marks a full redraw.
const CURSOR_HOME: &[u8] = b"\x1b[H";

/// Detect whether an output chunk begins a fresh screen frame.
///
/// True when the chunk contains an erase-display sequence anywhere, or
/// starts with a cursor-home (full-screen redraw). Terminal-style adapters
/// replace their local buffer on a screen frame instead of appending.
/// Purely presentational; the agent and relay never call this.
pub fn is_screen_frame(data: &[u8]) -> bool {
    data.starts_with(CURSOR_HOME) || contains(data, ERASE_DISPLAY)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.len() >= needle.len() && haystack.windows(needle.len()).any(|w| w == needle)
}
