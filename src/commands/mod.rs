pub mod job_commands;
