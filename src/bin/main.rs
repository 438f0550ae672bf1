fn main() {
    htnbridge::main()
}
