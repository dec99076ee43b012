//! Human-readable section tree of an image. Diagnostic only: parsing stops
//! quietly at the first section that does not decode.

use std::fmt;

use crate::capsule::section::{Sections, Tag, HEADER_LEN};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub tag: Tag,
    /// Absolute address of the section header.
    pub offset: u64,
    /// Absolute address of the payload.
    pub data_offset: u64,
    pub length: u32,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

/// Walk `image` as if it were loaded at `base`.
pub fn describe(image: &[u8], base: u64) -> Tree {
    Tree {
        nodes: walk(image, base),
    }
}

fn walk(bytes: &[u8], base: u64) -> Vec<Node> {
    let mut nodes = Vec::new();
    for item in Sections::new(bytes) {
        let Ok((rel, section)) = item else {
            break;
        };
        // Addresses past the end of the address space end the walk.
        let Some(offset) = base.checked_add(rel as u64) else {
            break;
        };
        let Some(data_offset) = offset.checked_add(HEADER_LEN as u64) else {
            break;
        };
        let children = if section.tag.is_container() {
            walk(section.payload, data_offset)
        } else {
            Vec::new()
        };
        nodes.push(Node {
            tag: section.tag,
            offset,
            data_offset,
            length: section.payload.len() as u32,
            children,
        });
    }
    nodes
}

impl Tree {
    /// Depth-first iteration over every node.
    pub fn iter(&self) -> impl Iterator<Item = &Node> + '_ {
        let mut stack: Vec<&Node> = self.nodes.iter().rev().collect();
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }

    pub fn find(&self, tag: Tag) -> Option<&Node> {
        self.iter().find(|n| n.tag == tag)
    }
}

fn fmt_nodes(nodes: &[Node], depth: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for node in nodes {
        writeln!(
            f,
            "{}{} section at 0x{:08x}, data 0x{:08x}, len {} bytes",
            "\t".repeat(depth),
            node.tag,
            node.offset,
            node.data_offset,
            node.length
        )?;
        fmt_nodes(&node.children, depth + 1, f)?;
    }
    Ok(())
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_nodes(&self.nodes, 0, f)
    }
}
