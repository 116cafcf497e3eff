/// Runs `$exec` with the guard of `$mutex` bound to `$lock`.
///
/// A poisoned mutex is recovered with `into_inner` and the guarded
/// value is used as is.
#[macro_export]
macro_rules! acquire_lock {
    ($mutex:expr, $lock:ident => $exec:expr) => {
        match $mutex.lock() {
            #[allow(unused_mut)]
            Ok(mut $lock) => $exec,
            #[allow(unused_mut)]
            Err(poisoned) => {
                let mut $lock = poisoned.into_inner();
                $exec
            }
        }
    };
}
