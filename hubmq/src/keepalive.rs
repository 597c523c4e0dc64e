use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::router::Router;

/// Spawns the periodic idle sweep, a backstop for the per-session receive timeout.
pub fn start(router: Router, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_millis(100)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let n = router.sweep_idle();
            if n > 0 {
                log::info!("keepalive sweep closed {} idle sessions, {} remain", n, router.client_count());
            }
        }
    })
}
