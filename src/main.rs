fn main() {
    kumite_board::run();
}
