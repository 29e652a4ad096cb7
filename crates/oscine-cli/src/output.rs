//! Terminal rendering of packets

use colored::Colorize;
use oscine_core::{type_tag_string, Atom, Packet};

pub fn format_message(address: &str, args: &[Atom]) -> String {
    let mut line = format!("{} {}", address.cyan(), type_tag_string(args).dimmed());
    for arg in args {
        line.push(' ');
        line.push_str(&arg.to_string());
    }
    line
}

pub fn print_packet(packet: &Packet) {
    print_nested(packet, 0);
}

fn print_nested(packet: &Packet, depth: usize) {
    let indent = "  ".repeat(depth);
    match packet {
        Packet::Message(message) => {
            println!("{}{}", indent, format_message(message.address(), message.args()));
        }
        Packet::Bundle(bundle) => {
            println!("{}{} {}", indent, "#bundle".magenta(), bundle.timestamp);
            for element in &bundle.elements {
                print_nested(element, depth + 1);
            }
        }
    }
}
