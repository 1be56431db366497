use crate::models::common::{TimestampNs, NANOS_PER_SEC};

/// Returns the current Internet Computer time as nanoseconds since epoch.
pub fn get_current_time_ns() -> TimestampNs {
    ic_cdk::api::time()
}

pub fn secs_to_ns(secs: u64) -> u64 {
    secs.saturating_mul(NANOS_PER_SEC)
}

/// Whole seconds left until `deadline`, rounded up so a countdown only
/// shows 0 once the deadline has actually passed.
pub fn remaining_secs(deadline: TimestampNs, now: TimestampNs) -> u64 {
    deadline.saturating_sub(now).div_ceil(NANOS_PER_SEC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_rounds_up_partial_seconds() {
        let deadline = secs_to_ns(10);
        assert_eq!(remaining_secs(deadline, 0), 10);
        assert_eq!(remaining_secs(deadline, secs_to_ns(9) + 1), 1);
        assert_eq!(remaining_secs(deadline, deadline), 0);
        assert_eq!(remaining_secs(deadline, deadline + 5), 0);
    }
}
