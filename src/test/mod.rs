mod fair_queue;
mod packet_pass;
mod support;
