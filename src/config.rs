use std::time::Duration;
use anyhow::bail;

/// Protocol timing and sizing parameters. All timeouts are expressed as a number of timer ticks,
///  and the tick length is the one knob that scales them all - WTP defines its intervals in
///  units of 'some implementation-defined time unit', and operators typically tune this to the
///  bearer (e.g. faster ticks on a LAN test setup than over GSM CSD).
pub struct WtpConfig {
    pub timer_tick: Duration,

    /// L_A: acknowledgement interval on the responder side (Timer A)
    pub ack_interval_ticks: u32,
    /// L_R: retry interval on the responder side (Timer R)
    pub retry_interval_ticks: u32,
    /// W: wait timeout, used both for the class 1 'hold on to the transaction' phase and for
    ///  discarding abandoned segmented transfers
    pub wait_timeout_ticks: u32,

    /// S_R without user ack: retry interval on the initiator side
    pub initiator_retry_interval_ticks: u32,
    pub initiator_retry_interval_ticks_with_user_ack: u32,

    /// Number of times Timer A may expire while the application has not yet acknowledged an
    ///  invoke that requested user acknowledgement
    pub aec_max: u8,
    /// Number of retransmissions before a transaction is given up
    pub max_rcr: u8,

    pub sar_segment_size: usize,
    /// Every `sar_group_len`th segment is a group trailer, i.e. the sender waits for an ack
    ///  before sending on
    pub sar_group_len: u8,
}

impl WtpConfig {
    pub fn new() -> WtpConfig {
        WtpConfig {
            timer_tick: Duration::from_secs(1),
            ack_interval_ticks: 4,
            retry_interval_ticks: 7,
            wait_timeout_ticks: 30,
            initiator_retry_interval_ticks: 3,
            initiator_retry_interval_ticks_with_user_ack: 4,
            aec_max: 6,
            max_rcr: 8,
            sar_segment_size: 1400,
            sar_group_len: 3,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.timer_tick.is_zero() {
            bail!("timer tick must not be zero");
        }
        if self.ack_interval_ticks == 0 || self.retry_interval_ticks == 0 || self.wait_timeout_ticks == 0 {
            bail!("responder timer intervals must be at least one tick");
        }
        if self.initiator_retry_interval_ticks == 0 || self.initiator_retry_interval_ticks_with_user_ack == 0 {
            bail!("initiator retry intervals must be at least one tick");
        }
        if self.sar_segment_size == 0 {
            bail!("SAR segment size must not be zero");
        }
        if self.sar_group_len == 0 {
            bail!("SAR group length must not be zero");
        }
        Ok(())
    }

    pub fn ack_interval(&self) -> Duration {
        self.timer_tick * self.ack_interval_ticks
    }

    pub fn retry_interval(&self) -> Duration {
        self.timer_tick * self.retry_interval_ticks
    }

    pub fn wait_timeout(&self) -> Duration {
        self.timer_tick * self.wait_timeout_ticks
    }

    pub fn initiator_retry_interval(&self, u_ack: bool) -> Duration {
        if u_ack {
            self.timer_tick * self.initiator_retry_interval_ticks_with_user_ack
        }
        else {
            self.timer_tick * self.initiator_retry_interval_ticks
        }
    }
}

impl Default for WtpConfig {
    fn default() -> Self {
        WtpConfig::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_is_valid() {
        assert!(WtpConfig::new().validate().is_ok());
    }

    #[rstest]
    #[case::zero_tick(|c: &mut WtpConfig| c.timer_tick = Duration::ZERO)]
    #[case::zero_ack_interval(|c: &mut WtpConfig| c.ack_interval_ticks = 0)]
    #[case::zero_wait_timeout(|c: &mut WtpConfig| c.wait_timeout_ticks = 0)]
    #[case::zero_initiator_retry(|c: &mut WtpConfig| c.initiator_retry_interval_ticks = 0)]
    #[case::zero_segment_size(|c: &mut WtpConfig| c.sar_segment_size = 0)]
    #[case::zero_group_len(|c: &mut WtpConfig| c.sar_group_len = 0)]
    fn test_validate_rejects(#[case] tweak: fn(&mut WtpConfig)) {
        let mut config = WtpConfig::new();
        tweak(&mut config);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_intervals_scale_with_tick() {
        let mut config = WtpConfig::new();
        config.timer_tick = Duration::from_millis(100);

        assert_eq!(config.ack_interval(), Duration::from_millis(400));
        assert_eq!(config.retry_interval(), Duration::from_millis(700));
        assert_eq!(config.wait_timeout(), Duration::from_secs(3));
        assert_eq!(config.initiator_retry_interval(false), Duration::from_millis(300));
        assert_eq!(config.initiator_retry_interval(true), Duration::from_millis(400));
    }
}
