fn main() {
    bevy_ballistics::game::run();
}
