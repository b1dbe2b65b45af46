// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Human readable frames: `name at file.rs:42 [inlined]`.
//!
//! `Display` prints only the base name of the source file; the alternate form
//! (`{:#}`) prints the full path.

use crate::frame::StackFrame;
use crate::trace::StackTrace;
use std::fmt::{self, Write};
use std::path::Path;

impl StackFrame {
    pub fn render(&self, full_path: bool) -> String {
        let mut out = String::new();
        // Writing into a String can't fail.
        let _ = write_frame(&mut out, self, full_path);
        out
    }
}

fn write_frame(w: &mut impl Write, frame: &StackFrame, full_path: bool) -> fmt::Result {
    match frame.definition() {
        None if frame.function_name().is_empty() => write!(w, "ip:{:#x}", frame.raw_address())?,
        None => write!(w, "{}", frame.function_name())?,
        // Methods render as a call signature, anything else with its own label.
        Some(definition) => write!(w, "{definition}")?,
    }

    let file = frame.source_file().as_str();
    if !file.is_empty() {
        w.write_str(" at ")?;
        if full_path {
            w.write_str(file)?;
        } else {
            w.write_str(base_name(file))?;
        }
        w.write_char(':')?;
        if frame.has_known_line() {
            write!(w, "{}", frame.line_number())?;
        } else {
            w.write_char('?')?;
        }
    }

    if frame.is_inlined() {
        w.write_str(" [inlined]")?;
    }
    Ok(())
}

fn base_name(file: &str) -> &str {
    Path::new(file)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(file)
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let full_path = f.alternate();
        write_frame(f, self, full_path)
    }
}

impl fmt::Display for StackTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let full_path = f.alternate();
        for (i, frame) in self.iter().enumerate() {
            if i > 0 {
                f.write_char('\n')?;
            }
            write!(f, " [{}] ", i + 1)?;
            write_frame(f, frame, full_path)?;
        }
        Ok(())
    }
}
