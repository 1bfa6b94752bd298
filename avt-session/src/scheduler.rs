/// Minimum average time between RTCP packets from this site, in seconds.
/// Keeps reports from clumping in small sessions and stops the interval
/// collapsing during transient outages.
const RTCP_MIN_TIME: f64 = 5.0;

/// Fraction of the RTCP bandwidth reserved for active senders; receivers
/// share the rest. Chosen so one or two senders report at roughly the
/// minimum interval.
const RTCP_SENDER_BW_FRACTION: f64 = 0.25;

/// Bandwidth scale applied while reconsidering a fired timer (e-3/2).
const RECONSIDERATION_SCALE: f64 = 1.21828;

/// Computes the randomized, bandwidth-scaled RTCP transmission interval
/// (RFC 1889 section 6.3.1) and tracks the running average compound
/// packet size used in the computation.
#[derive(Debug)]
pub(crate) struct RtcpScheduler {
    bandwidth: f64,
    pub(crate) avg_rtcp_size: f64,
    /// True until the first control packet goes out; the minimum interval
    /// is halved for faster initial feedback.
    pub(crate) initial: bool,
    interval: f64,
}

impl RtcpScheduler {
    pub(crate) fn new(bandwidth: f64) -> Self {
        RtcpScheduler {
            bandwidth,
            // Guess at a sensible starting point.
            avg_rtcp_size: 70.0,
            initial: true,
            interval: 0.0,
        }
    }

    /// Time in seconds until the next control packet is due, scaled by a
    /// uniform random factor in [0.5, 1.5) to break up inter-site
    /// synchronization. With `reconsider` set the bandwidth budget is
    /// inflated, backing the timer off while leaving the group.
    pub(crate) fn transmission_interval(
        &mut self,
        members: usize,
        senders: usize,
        we_sent: bool,
        reconsider: bool,
    ) -> f64 {
        let mut bandwidth = self.bandwidth;
        if reconsider {
            bandwidth *= RECONSIDERATION_SCALE;
        }

        let mut min_time = RTCP_MIN_TIME;
        if self.initial {
            min_time /= 2.0;
        }

        // Active senders get a guaranteed share of the budget when they are
        // a small minority; otherwise everyone shares it equally.
        let mut n = members as f64;
        if senders > 0 && (senders as f64) < members as f64 * RTCP_SENDER_BW_FRACTION {
            if we_sent {
                bandwidth *= RTCP_SENDER_BW_FRACTION;
                n = senders as f64;
            } else {
                bandwidth *= 1.0 - RTCP_SENDER_BW_FRACTION;
                n -= senders as f64;
            }
        }

        // Effective member count times average packet size, over the
        // bandwidth those packets must fit in, is the reporting interval.
        let mut t = self.avg_rtcp_size * n / bandwidth;
        if t < min_time {
            t = min_time;
        }
        self.interval = t;

        t * (rand::random::<f64>() + 0.5)
    }

    /// The deterministic interval behind the last randomized value.
    pub(crate) fn deterministic_interval(&self) -> f64 {
        self.interval
    }

    /// Fold one compound packet's wire size into the running average
    /// (1/16 gain, section 6.3.3). Sent and received packets both count.
    pub(crate) fn update_avg_size(&mut self, len: usize) {
        self.avg_rtcp_size = 0.0625 * len as f64 + 0.9375 * self.avg_rtcp_size;
    }
}
