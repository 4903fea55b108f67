mod frame;
mod vsm;
