fn main() {
    worktimer_lib::run()
}
