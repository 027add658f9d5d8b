//! The optimization pipeline.
//!
//! Two passes over the tree. Pass 1 rewrites each loop-free run of siblings
//! so that data operations address cells by offset instead of walking the
//! cursor there and back; pass 2 is a fixed-point local rewriter that folds
//! runs, recognizes the classic loop patterns and coalesces constants.
//!
//! Every rewrite preserves source locations: a rewritten node adopts the
//! location of the first node its pattern consumed.

use crate::ast::{Node, NodeKind};

/// Run the full pipeline in place.
pub fn optimize(nodes: &mut Vec<Node>) {
    rewrite_sequences(nodes);
    fixed_point(nodes);
}

// ── Pass 1: sequence rewriting ───────────────────────────────────

/// Within each maximal loop-free run of siblings, fold cursor movement into
/// the data nodes' offsets and keep at most one residual `MovePtr` carrying
/// the net movement. Recurses into loop bodies.
fn rewrite_sequences(nodes: &mut Vec<Node>) {
    let mut out = Vec::with_capacity(nodes.len());
    let mut running: i32 = 0;
    // Location of the first consumed MovePtr of the current run, for the
    // residual node.
    let mut anchor: Option<(u32, u32)> = None;

    for mut node in nodes.drain(..) {
        match &mut node.kind {
            NodeKind::MovePtr { count } => {
                if anchor.is_none() {
                    anchor = Some((node.line, node.column));
                }
                running = running.wrapping_add(*count);
            }
            NodeKind::Loop { body } => {
                flush_residual(&mut out, &mut running, &mut anchor);
                rewrite_sequences(body);
                out.push(node);
            }
            NodeKind::AddVal { offset, .. }
            | NodeKind::Output { offset }
            | NodeKind::Input { offset }
            | NodeKind::SetConst { offset, .. } => {
                *offset += running;
                out.push(node);
            }
            NodeKind::Mul {
                src_offset,
                dst_offset,
                ..
            }
            | NodeKind::CopyCell {
                src_offset,
                dst_offset,
            } => {
                *src_offset += running;
                *dst_offset += running;
                out.push(node);
            }
        }
    }
    flush_residual(&mut out, &mut running, &mut anchor);
    *nodes = out;
}

fn flush_residual(out: &mut Vec<Node>, running: &mut i32, anchor: &mut Option<(u32, u32)>) {
    if *running != 0 {
        if let Some((line, column)) = *anchor {
            out.push(Node::new(NodeKind::MovePtr { count: *running }, line, column));
        }
    }
    *running = 0;
    *anchor = None;
}

// ── Pass 2: fixed-point rules ────────────────────────────────────

/// Apply the local rules bottom-up until none fires.
///
/// When a rule fires at position `i`, scanning resumes one node earlier so
/// the rewritten node can combine with its new left neighbor (a cleared loop
/// absorbing the `AddVal` that fed it, for instance).
fn fixed_point(nodes: &mut Vec<Node>) {
    for node in nodes.iter_mut() {
        if let NodeKind::Loop { body } = &mut node.kind {
            fixed_point(body);
        }
    }

    let mut i = 0;
    while i < nodes.len() {
        if apply_rules_at(nodes, i) {
            i = i.saturating_sub(1);
        } else {
            i += 1;
        }
    }
}

fn apply_rules_at(nodes: &mut Vec<Node>, i: usize) -> bool {
    fold_run_length(nodes, i)
        || collapse_clear_loop(nodes, i)
        || lower_multiplication_loop(nodes, i)
        || collapse_offset_add(nodes, i)
        || coalesce_constants(nodes, i)
}

/// Rule 1: merge consecutive `MovePtr`s, and consecutive `AddVal`s with the
/// same offset. A merge that nets to zero deletes the node outright.
fn fold_run_length(nodes: &mut Vec<Node>, i: usize) -> bool {
    if i + 1 >= nodes.len() {
        return false;
    }
    let merged = match (&nodes[i].kind, &nodes[i + 1].kind) {
        (NodeKind::MovePtr { count: a }, NodeKind::MovePtr { count: b }) => {
            Some(NodeKind::MovePtr {
                count: a.wrapping_add(*b),
            })
        }
        (
            NodeKind::AddVal {
                count: a,
                offset: oa,
            },
            NodeKind::AddVal {
                count: b,
                offset: ob,
            },
        ) if oa == ob => Some(NodeKind::AddVal {
            count: a.wrapping_add(*b),
            offset: *oa,
        }),
        _ => None,
    };
    let Some(kind) = merged else {
        return false;
    };

    nodes.remove(i + 1);
    if matches!(
        kind,
        NodeKind::MovePtr { count: 0 } | NodeKind::AddVal { count: 0, .. }
    ) {
        nodes.remove(i);
    } else {
        // Payload swap keeps the first node's location.
        nodes[i].kind = kind;
    }
    true
}

/// Rule 2: `[-]` clears the current cell.
fn collapse_clear_loop(nodes: &mut Vec<Node>, i: usize) -> bool {
    let NodeKind::Loop { body } = &nodes[i].kind else {
        return false;
    };
    if body.len() == 1
        && matches!(
            body[0].kind,
            NodeKind::AddVal {
                count: -1,
                offset: 0
            }
        )
    {
        nodes[i].kind = NodeKind::SetConst {
            value: 0,
            offset: 0,
        };
        return true;
    }
    false
}

/// Rule 3: a loop whose body is nothing but `AddVal`s, exactly one of which
/// is the `AddVal(-1, 0)` counter decrement, multiplies the counter cell into
/// its targets and then clears it.
///
/// Any other body node rejects the pattern. That includes `MovePtr`: after
/// sequence rewriting a surviving body `MovePtr` is a nonzero residual, so
/// the loop walks the tape and is not a multiplication.
fn lower_multiplication_loop(nodes: &mut Vec<Node>, i: usize) -> bool {
    let NodeKind::Loop { body } = &nodes[i].kind else {
        return false;
    };

    let mut targets = Vec::with_capacity(body.len());
    let mut decrements = 0;
    for node in body {
        let NodeKind::AddVal { count, offset } = node.kind else {
            return false;
        };
        if offset == 0 {
            if count != -1 {
                return false;
            }
            decrements += 1;
        } else {
            targets.push((count, offset));
        }
    }
    if decrements != 1 {
        return false;
    }

    // All lowered nodes inherit the loop's source location.
    let (line, column) = (nodes[i].line, nodes[i].column);
    let mut lowered = Vec::with_capacity(targets.len() + 1);
    for (count, offset) in targets {
        let kind = if count == 1 {
            NodeKind::CopyCell {
                src_offset: 0,
                dst_offset: offset,
            }
        } else {
            NodeKind::Mul {
                multiplier: count,
                src_offset: 0,
                dst_offset: offset,
            }
        };
        lowered.push(Node::new(kind, line, column));
    }
    lowered.push(Node::new(
        NodeKind::SetConst {
            value: 0,
            offset: 0,
        },
        line,
        column,
    ));
    nodes.splice(i..=i, lowered);
    true
}

/// Rule 4: `MovePtr(n)`, `AddVal(c, 0)`, `MovePtr(-n)` becomes `AddVal(c, n)`.
/// Fires only when the two moves cancel exactly.
fn collapse_offset_add(nodes: &mut Vec<Node>, i: usize) -> bool {
    if i + 2 >= nodes.len() {
        return false;
    }
    let NodeKind::MovePtr { count: out } = nodes[i].kind else {
        return false;
    };
    let NodeKind::AddVal { count, offset: 0 } = nodes[i + 1].kind else {
        return false;
    };
    let NodeKind::MovePtr { count: back } = nodes[i + 2].kind else {
        return false;
    };
    if back != -out {
        return false;
    }

    let (line, column) = (nodes[i].line, nodes[i].column);
    nodes.splice(
        i..=i + 2,
        [Node::new(
            NodeKind::AddVal { count, offset: out },
            line,
            column,
        )],
    );
    true
}

/// Rule 5: constant coalescing, both directions. A `SetConst` followed by a
/// same-offset `AddVal` folds the addend into the constant; an `AddVal`
/// immediately overwritten by a same-offset `SetConst` is dead.
fn coalesce_constants(nodes: &mut Vec<Node>, i: usize) -> bool {
    if i + 1 >= nodes.len() {
        return false;
    }

    let rewritten = match (&nodes[i].kind, &nodes[i + 1].kind) {
        (
            NodeKind::SetConst { value, offset },
            NodeKind::AddVal {
                count,
                offset: add_offset,
            },
        ) if offset == add_offset => Some(NodeKind::SetConst {
            value: value.wrapping_add(*count),
            offset: *offset,
        }),
        (
            NodeKind::AddVal { offset, .. },
            NodeKind::SetConst {
                value,
                offset: set_offset,
            },
        ) if offset == set_offset => Some(NodeKind::SetConst {
            value: *value,
            offset: *offset,
        }),
        _ => None,
    };

    let Some(kind) = rewritten else {
        return false;
    };
    nodes[i].kind = kind;
    nodes.remove(i + 1);
    true
}
