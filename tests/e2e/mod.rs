mod batch_flow_test;
mod delta_flow_test;
mod governor_test;
