use std::time::{Duration, Instant};

use tablechain::{
    config::Configuration,
    types::{
        basic::Difficulty,
        value::{row, Value},
    },
};

/// A configuration that keeps tests fast: a trivial proof-of-work and short timeouts.
pub(crate) fn test_configuration(table_name: &str) -> Configuration {
    Configuration::builder()
        .table_name(table_name)
        .pow_difficulty(Difficulty::new(1))
        .sync_timeout(Duration::from_secs(5))
        .execute_timeout(Duration::from_secs(5))
        .poll_interval(Duration::from_millis(10))
        .build()
}

/// A row with a `name` and an `age` column.
pub(crate) fn person(name: &str, age: i64) -> Value {
    Value::Map(row([("name", Value::from(name)), ("age", Value::from(age))]))
}

/// Poll `condition` until it holds, panicking after `timeout`.
pub(crate) fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() {
        if Instant::now() > deadline {
            panic!("condition did not hold within {:?}", timeout);
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}
