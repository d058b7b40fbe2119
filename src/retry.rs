/// Run `op` up to `retries` times, returning the first success.
/// All attempts failing propagates the last error. No delay between
/// attempts; the wrapped operation carries its own timeouts.
pub fn retry<T, E, F>(retries: u32, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
{
    let attempts = if retries == 0 { 1 } else { retries };
    let mut last_err = None;
    for _ in 0..attempts {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap())
}

#[cfg(test)]
mod tests {
    use super::retry;

    #[test]
    fn returns_first_success() {
        let mut calls = 0;
        let result: Result<u32, &str> = retry(3, || {
            calls += 1;
            Ok(42)
        });
        assert_eq!(result, Ok(42));
        assert_eq!(calls, 1);
    }

    #[test]
    fn succeeds_on_last_attempt() {
        let mut calls = 0;
        let result: Result<u32, String> = retry(3, || {
            calls += 1;
            if calls < 3 {
                Err(format!("fail {}", calls))
            } else {
                Ok(7)
            }
        });
        assert_eq!(result, Ok(7));
        assert_eq!(calls, 3);
    }

    #[test]
    fn propagates_last_error() {
        let mut calls = 0;
        let result: Result<u32, String> = retry(3, || {
            calls += 1;
            Err(format!("fail {}", calls))
        });
        assert_eq!(result, Err(String::from("fail 3")));
        assert_eq!(calls, 3);
    }

    #[test]
    fn zero_retries_still_runs_once() {
        let mut calls = 0;
        let result: Result<(), &str> = retry(0, || {
            calls += 1;
            Err("nope")
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
