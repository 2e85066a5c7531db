// Slice-based STOMP frame parser operating on an unescaped envelope payload.
//
// A payload is the contents of one envelope string after unescaping: one or
// more frames, each `COMMAND\n(header:value\n)*\n<body>\0`, optionally
// followed by LF padding. The parser consumes one frame per call and
// reports how many bytes it used so the codec can batch.

/// One parsed frame as raw parts: command line, header pairs, body bytes,
/// and the number of input bytes consumed.
pub(crate) type RawFrame = (String, Vec<(String, String)>, Vec<u8>, usize);

pub(crate) type ParseResult = Result<Option<RawFrame>, String>;

/// Parse a single NUL-terminated frame from the front of `input`.
///
/// Returns `Ok(None)` when the input holds nothing but LF padding. Input
/// that starts a frame without finishing it (no blank line, no NUL
/// terminator, a header line without `:`) is malformed: the transport
/// delivers whole messages, so there is no partial-read case to wait out.
pub(crate) fn parse_frame_slice(input: &[u8]) -> ParseResult {
    let mut pos = 0usize;
    let len = input.len();

    // LF padding between frames is tolerated and skipped
    while pos < len && input[pos] == b'\n' {
        pos += 1;
    }
    if pos >= len {
        return Ok(None);
    }

    // command line
    let cmd_end = input[pos..]
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| "missing end of command line".to_string())?;
    let mut cmd_bytes = &input[pos..pos + cmd_end];
    if cmd_bytes.last() == Some(&b'\r') {
        cmd_bytes = &cmd_bytes[..cmd_bytes.len() - 1];
    }
    let command = str_from(cmd_bytes, "command")?;
    if command.is_empty() {
        return Err("empty command line".to_string());
    }
    pos += cmd_end + 1;

    // header lines until the blank separator
    let mut headers: Vec<(String, String)> = Vec::new();
    loop {
        if pos >= len {
            return Err("missing blank line after headers".to_string());
        }
        if input[pos] == b'\n' {
            pos += 1;
            break;
        }
        let line_end = input[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| "missing end of header line".to_string())?;
        let mut line = &input[pos..pos + line_end];
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        let colon = line.iter().position(|&b| b == b':').ok_or_else(|| {
            format!(
                "malformed header line: {:?}",
                String::from_utf8_lossy(line)
            )
        })?;
        let key = str_from(&line[..colon], "header key")?;
        let value = str_from(&line[colon + 1..], "header value")?;
        headers.push((key, value));
        pos += line_end + 1;
    }

    // body runs to the NUL terminator
    let nul = input[pos..]
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| "missing NUL terminator".to_string())?;
    let body = input[pos..pos + nul].to_vec();
    pos += nul + 1;

    Ok(Some((command, headers, body, pos)))
}

fn str_from(bytes: &[u8], what: &str) -> Result<String, String> {
    std::str::from_utf8(bytes)
        .map(|s| s.to_string())
        .map_err(|e| format!("invalid utf8 in {}: {}", what, e))
}
