//! Source parser.
//!
//! Only the eight operator characters are meaningful; everything else is a
//! comment that still advances the position counters. Bracket matching and
//! the nesting-depth limit are enforced here so later stages can assume a
//! well-formed tree.

use thiserror::Error;

use crate::ast::{Node, NodeKind, MAX_NESTING};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unmatched '[' at {line}:{column}")]
    UnmatchedOpen { line: u32, column: u32 },
    #[error("unmatched ']' at {line}:{column}")]
    UnmatchedClose { line: u32, column: u32 },
    #[error("loop nesting exceeds {limit} levels at {line}:{column}")]
    TooDeep { line: u32, column: u32, limit: usize },
}

/// One open `[` on the parse stack: the nodes collected so far at that level
/// plus the bracket's own source position.
struct OpenLoop {
    nodes: Vec<Node>,
    line: u32,
    column: u32,
}

/// Parse a source byte stream into the root sibling list.
///
/// An empty (or comment-only) program yields an empty list.
pub fn parse(src: &[u8]) -> Result<Vec<Node>, ParseError> {
    let mut root = Vec::new();
    let mut stack: Vec<OpenLoop> = Vec::new();
    let mut line: u32 = 1;
    let mut column: u32 = 1;

    for &byte in src {
        let kind = match byte {
            b'>' => Some(NodeKind::MovePtr { count: 1 }),
            b'<' => Some(NodeKind::MovePtr { count: -1 }),
            b'+' => Some(NodeKind::AddVal { count: 1, offset: 0 }),
            b'-' => Some(NodeKind::AddVal {
                count: -1,
                offset: 0,
            }),
            b'.' => Some(NodeKind::Output { offset: 0 }),
            b',' => Some(NodeKind::Input { offset: 0 }),
            b'[' => {
                if stack.len() >= MAX_NESTING {
                    return Err(ParseError::TooDeep {
                        line,
                        column,
                        limit: MAX_NESTING,
                    });
                }
                stack.push(OpenLoop {
                    nodes: Vec::new(),
                    line,
                    column,
                });
                None
            }
            b']' => {
                let open = stack
                    .pop()
                    .ok_or(ParseError::UnmatchedClose { line, column })?;
                let node = Node::new(NodeKind::Loop { body: open.nodes }, open.line, open.column);
                current_level(&mut root, &mut stack).push(node);
                None
            }
            b'\n' => {
                line += 1;
                column = 0; // bumped back to 1 below
                None
            }
            _ => None,
        };

        if let Some(kind) = kind {
            current_level(&mut root, &mut stack).push(Node::new(kind, line, column));
        }
        column += 1;
    }

    if let Some(open) = stack.pop() {
        return Err(ParseError::UnmatchedOpen {
            line: open.line,
            column: open.column,
        });
    }

    Ok(root)
}

fn current_level<'a>(root: &'a mut Vec<Node>, stack: &'a mut [OpenLoop]) -> &'a mut Vec<Node> {
    match stack.last_mut() {
        Some(open) => &mut open.nodes,
        None => root,
    }
}
