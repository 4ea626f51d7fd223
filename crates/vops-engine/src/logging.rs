//! Logging setup for programs embedding the library.

use tracing::Level;

/// Install a fmt subscriber at `level`. Returns false if a global
/// subscriber was already set.
pub fn init(level: Level) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        let _ = init(Level::DEBUG);
        assert!(!init(Level::INFO));
    }
}
