//! Print the session transition table as a Graphviz graph
//!
//! ```bash
//! cargo run --example export_state_machine | dot -Tsvg > session.svg
//! ```

use igt_tracker::io::state_machine::TransitionTable;

fn main() {
    match TransitionTable::standard() {
        Ok(table) => print!("{}", table.to_dot("TransportSession")),
        Err(e) => {
            eprintln!("[ERROR] {}", e);
            std::process::exit(1);
        }
    }
}
