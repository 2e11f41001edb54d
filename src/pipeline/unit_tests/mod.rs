#[cfg(test)]
mod ingress_tests;
#[cfg(test)]
mod packet_mgr_tests;
#[cfg(test)]
mod queue_pool_tests;
#[cfg(test)]
mod stats_tests;
#[cfg(test)]
mod submit_tests;
#[cfg(test)]
mod translate_tests;
