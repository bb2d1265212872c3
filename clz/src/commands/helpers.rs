//! Shared helper functions for clusterize commands.

use anyhow::{Context as _, Result};
use std::net::UdpSocket;

/// Indent each line of text with a given prefix.
pub fn indent_lines(text: &str, prefix: &str) -> String {
    let mut out = String::new();
    for (idx, line) in text.lines().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        out.push_str(prefix);
        out.push_str(line);
    }
    out
}

/// A labeled node of a printable tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub label: String,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            children: Vec::new(),
        }
    }

    pub fn with_children(label: impl Into<String>, children: Vec<TreeNode>) -> Self {
        Self {
            label: label.into(),
            children,
        }
    }
}

/// Render a tree with box-drawing connectors.
pub fn format_tree(root: &TreeNode) -> String {
    let mut out = root.label.clone();
    write_children(&root.children, "", &mut out);
    out
}

fn write_children(children: &[TreeNode], prefix: &str, out: &mut String) {
    for (idx, child) in children.iter().enumerate() {
        let last = idx + 1 == children.len();
        out.push('\n');
        out.push_str(prefix);
        out.push_str(if last { "└── " } else { "├── " });
        out.push_str(&child.label);
        let nested = format!("{prefix}{}", if last { "    " } else { "│   " });
        write_children(&child.children, &nested, out);
    }
}

/// Address of the interface that carries the default route.
///
/// Connecting a UDP socket sends nothing; it only asks the kernel to pick a
/// source address.
pub fn default_head_ip() -> Result<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").context("Failed to bind a local UDP socket")?;
    socket
        .connect("8.8.8.8:80")
        .context("No default route; pass --head-ip explicitly")?;
    let addr = socket
        .local_addr()
        .context("Failed to read the local address")?;
    Ok(addr.ip().to_string())
}
