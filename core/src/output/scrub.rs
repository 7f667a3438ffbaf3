/// Strip ANSI escape sequences and non-printing control characters.
///
/// Removes CSI sequences (`ESC [ … final`), OSC sequences (`ESC ] … BEL`
/// or `ESC ] … ESC \`), other two-character escapes, and C0 controls apart
/// from `\n` and `\t`. Chat-style adapters run output through this before
/// posting to transports that render raw text.
pub fn scrub_control_sequences(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            match chars.next() {
                // CSI: parameters and intermediates end at a byte in @..~.
                Some('[') => {
                    for t in chars.by_ref() {
                        if ('\u{40}'..='\u{7e}').contains(&t) {
                            break;
                        }
                    }
                }
                // OSC: terminated by BEL or ESC \.
                Some(']') => {
                    while let Some(t) = chars.next() {
                        if t == '\u{7}' {
                            break;
                        }
                        if t == '\u{1b}' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                // Two-character escape (charset selection etc.): drop both.
                Some(_) | None => {}
            }
        } else if c == '\n' || c == '\t' || !c.is_control() {
            out.push(c);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_plain_text_through() {
        assert_eq!(scrub_control_sequences("hello world"), "hello world");
    }

    #[test]
    fn strips_color_codes() {
        assert_eq!(scrub_control_sequences("\x1b[31mred\x1b[0m"), "red");
    }

    #[test]
    fn strips_cursor_movement() {
        assert_eq!(scrub_control_sequences("a\x1b[2J\x1b[Hb"), "ab");
    }

    #[test]
    fn strips_osc_title_sequences() {
        assert_eq!(scrub_control_sequences("\x1b]0;my title\x07text"), "text");
        assert_eq!(scrub_control_sequences("\x1b]8;;url\x1b\\link"), "link");
    }

    #[test]
    fn keeps_newlines_and_tabs() {
        assert_eq!(scrub_control_sequences("a\n\tb"), "a\n\tb");
    }

    #[test]
    fn drops_carriage_returns_and_bells() {
        assert_eq!(scrub_control_sequences("ding\x07dong\r"), "dingdong");
    }

    #[test]
    fn tolerates_truncated_escape_at_end() {
        assert_eq!(scrub_control_sequences("ok\x1b"), "ok");
        assert_eq!(scrub_control_sequences("ok\x1b[31"), "ok");
    }
}
