// App layer: one module per command, each a plain async function over the client and storage.

pub mod attack;
pub mod flag_submit;
pub mod index_perf;
pub mod provision;
pub mod race;
