pub(crate) mod activities;
pub(crate) mod health;
