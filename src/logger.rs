use colored::*;

#[derive(Clone, Copy)]
pub struct Logger;

impl Logger {
    pub fn information(&self, message: &str) {
        eprintln!("{}", message);
    }

    pub fn warning(&self, message: &str) {
        eprintln!("{}", message.yellow());
    }

    pub fn error(&self, message: &str) {
        eprintln!("{}", message.red());
    }

    /// Step banner, e.g. "Running Step 3: align".
    pub fn section(&self, title: &str) {
        let rule = "─".repeat(title.chars().count());
        eprintln!("{}", rule);
        eprintln!("{}", title.bold());
        eprintln!("{}", rule);
    }
}
