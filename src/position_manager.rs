use crate::config::{SizingConfig, SorosBasis};

/// Settled result of one order, as seen by the staking state machine.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AttemptOutcome {
    Win { profit: f64 },
    Loss,
    /// Tie, refund, settlement timeout or cancellation: no directional result.
    Void,
    /// Broker refused the order.
    Rejected,
}

/// What the engine does after feeding an outcome into the state machine.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Transition {
    /// Re-enter immediately, same asset and direction, with the doubled stake.
    Retry { level: u32, stake: f64 },
    /// The entry resolved. Counts once toward the entry limit.
    Won,
    Lost,
    /// The entry ended without a directional result. Does not count as an entry.
    Voided,
}

/// Per-asset staking state.
///
/// `opening_stake` is the stake the current entry sequence started with (the soros
/// base); `current_stake` is what the next attempt will risk.
#[derive(Clone, Debug, PartialEq)]
pub struct PositionState {
    pub base_stake: f64,
    pub opening_stake: f64,
    pub current_stake: f64,
    pub martingale_level: u32,
    pub max_martingale_level: u32,
    /// Compounded opening stake for the next entry, set by a qualifying soros win.
    pub soros_carry: Option<f64>,
    pub consecutive_losses: u32,
    pub eligible_to_trade: bool,
    suspended_for: u32,
    soros_percent: f64,
    soros_basis: SorosBasis,
    soros_on_martingale_win: bool,
    suspension_cycles: u32,
}

impl PositionState {
    pub fn new(cfg: &SizingConfig) -> Self {
        PositionState {
            base_stake: cfg.stake,
            opening_stake: cfg.stake,
            current_stake: cfg.stake,
            martingale_level: 0,
            max_martingale_level: cfg.max_level(),
            soros_carry: None,
            consecutive_losses: 0,
            eligible_to_trade: true,
            suspended_for: 0,
            soros_percent: cfg.soros_percent,
            soros_basis: cfg.soros_basis,
            soros_on_martingale_win: cfg.soros_on_martingale_win,
            suspension_cycles: cfg.suspension_cycles,
        }
    }

    /// Stake of the next attempt.
    pub fn stake(&self) -> f64 {
        self.current_stake
    }

    /// Feeds a settled attempt into the machine.
    pub fn apply(&mut self, outcome: AttemptOutcome) -> Transition {
        match outcome {
            AttemptOutcome::Win { profit } => {
                let qualifies = self.soros_percent > 0.0
                    && (self.martingale_level == 0 || self.soros_on_martingale_win);
                if qualifies {
                    let next = match self.soros_basis {
                        SorosBasis::Profit => self.opening_stake + profit * self.soros_percent / 100.0,
                        SorosBasis::Stake => self.opening_stake * (1.0 + self.soros_percent / 100.0),
                    };
                    self.soros_carry = Some(next);
                    self.open_at(next);
                } else {
                    self.soros_carry = None;
                    self.open_at(self.base_stake);
                }
                self.consecutive_losses = 0;
                Transition::Won
            }
            AttemptOutcome::Loss => {
                self.consecutive_losses += 1;
                if self.martingale_level < self.max_martingale_level {
                    self.martingale_level += 1;
                    self.current_stake *= 2.0;
                    Transition::Retry { level: self.martingale_level, stake: self.current_stake }
                } else {
                    self.soros_carry = None;
                    self.open_at(self.base_stake);
                    Transition::Lost
                }
            }
            AttemptOutcome::Void => {
                self.open_at(self.opening_stake);
                Transition::Voided
            }
            AttemptOutcome::Rejected => {
                self.open_at(self.opening_stake);
                self.suspend();
                Transition::Voided
            }
        }
    }

    fn open_at(&mut self, stake: f64) {
        self.opening_stake = stake;
        self.current_stake = stake;
        self.martingale_level = 0;
    }

    fn suspend(&mut self) {
        if self.suspension_cycles > 0 {
            self.eligible_to_trade = false;
            self.suspended_for = self.suspension_cycles;
        }
    }

    /// Called when the asset's turn comes up. Returns `false` (and counts the skipped
    /// cycle down) while the asset is suspended.
    pub fn take_turn(&mut self) -> bool {
        if self.eligible_to_trade {
            return true;
        }
        self.suspended_for = self.suspended_for.saturating_sub(1);
        if self.suspended_for == 0 {
            self.eligible_to_trade = true;
        }
        false
    }
}
