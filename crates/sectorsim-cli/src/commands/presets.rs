use sectorsim_core::{interface_delay, COMMAND_SIZE, PROTOCOL_EFFICIENCY, SECTOR_SIZE};

pub fn run() {
    println!("\nLink speed presets (delays per transfer, one lane, in 1 ns ticks):\n");
    println!(
        "{:<8} {:>14} {:>14} {:>12}",
        "preset", "bytes/sec", "command", "data"
    );
    println!("{}", "-".repeat(52));

    for &(name, bytes_per_sec) in super::PRESETS {
        let command = interface_delay(COMMAND_SIZE, bytes_per_sec, PROTOCOL_EFFICIENCY);
        let data = interface_delay(COMMAND_SIZE + SECTOR_SIZE, bytes_per_sec, PROTOCOL_EFFICIENCY);
        println!("{name:<8} {bytes_per_sec:>14} {command:>14} {data:>12}");
    }

    println!("\nA rating of 0 in a configuration file models an absent link (zero delay).");
}
