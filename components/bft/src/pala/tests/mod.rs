mod block;
mod clock;
mod proposal;
mod proposer;
mod vote;
