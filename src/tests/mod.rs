mod common;

#[cfg(not(loom))]
mod test;
